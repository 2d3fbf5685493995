use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use pcap::{Active, Capture, Device, Offline, Packet, PacketHeader, Savefile};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task;

use crate::listener::Settings;
use crate::LinkLayer;

pub type PacketSender = UnboundedSender<OwnedPacket>;
pub type PacketReceiver = UnboundedReceiver<OwnedPacket>;

#[derive(Clone, Debug)]
pub struct OwnedPacket {
    pub header: PacketHeader,
    pub data: Vec<u8>,
}

impl<'a> From<Packet<'a>> for OwnedPacket {
    fn from(packet: Packet<'a>) -> Self {
        OwnedPacket {
            header: *packet.header,
            data: packet.data.to_vec(),
        }
    }
}

/// Consecutive read failures. Any successful read resets the streak.
#[derive(Debug, Default)]
pub struct ErrorStreak {
    count: usize,
}

impl ErrorStreak {
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Records one failure. True once the streak exceeds
    /// `Settings::MAX_CONSECUTIVE_READ_ERRORS`.
    pub fn fail(&mut self) -> bool {
        self.count += 1;
        self.count > Settings::MAX_CONSECUTIVE_READ_ERRORS
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

fn link_layer(linktype: pcap::Linktype) -> Result<LinkLayer> {
    LinkLayer::from_linktype(linktype).ok_or_else(|| {
        anyhow!(
            "Unsupported link type {} ({})",
            linktype.0,
            linktype.get_name().unwrap_or_else(|_| String::from("unknown"))
        )
    })
}

/// Reads a pcap savefile in capture order.
pub struct CaptureFile {
    cap: Capture<Offline>,
    link: LinkLayer,
}

impl CaptureFile {
    pub fn open(path: &Path, filter: Option<&str>) -> Result<Self> {
        let mut cap = Capture::from_file_with_precision(path, Settings::PRECISION)
            .with_context(|| format!("Failed to open capture file {}", path.display()))?;
        let link = link_layer(cap.get_datalink())?;
        if let Some(filter) = filter {
            cap.filter(filter, true)
                .with_context(|| format!("Invalid capture filter '{}'", filter))?;
        }
        info!("Reading {} ({:?} link layer)", path.display(), link);
        Ok(CaptureFile { cap, link })
    }

    pub fn link(&self) -> LinkLayer {
        self.link
    }
}

impl Iterator for CaptureFile {
    type Item = Result<OwnedPacket, pcap::Error>;

    /// Yields read errors per record; ends at the end of the file.
    fn next(&mut self) -> Option<Self::Item> {
        match self.cap.next_packet() {
            Ok(packet) => Some(Ok(OwnedPacket::from(packet))),
            Err(pcap::Error::NoMorePackets) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Live capture on a network interface.
pub struct PacketCapturer {
    cap: Capture<Active>,
    link: LinkLayer,
}

impl PacketCapturer {
    /**
     *  Open `iface` (or the default device) for capturing
     */
    pub fn new(iface: Option<&str>, filter: Option<&str>, snaplen: i32, promisc: bool) -> Result<Self> {
        let device = match iface {
            Some(name) => Device::from(name),
            None => Device::lookup()?.ok_or_else(|| anyhow!("No device available for capture"))?,
        };
        info!("Using device: {}", device.name);

        let mut cap = Capture::from_device(device.clone())?
            .promisc(promisc)
            .immediate_mode(Settings::IMMEDIATE_MODE)
            .timeout(Settings::TIMEOUT) // Timeout in milliseconds
            .precision(Settings::PRECISION)
            .snaplen(snaplen)
            .open()
            .with_context(|| format!("Failed to open device {}", device.name))?;

        if let Some(filter) = filter {
            cap.filter(filter, true)
                .with_context(|| format!("Invalid capture filter '{}'", filter))?;
            info!("Capture filter: {}", filter);
        }

        let link = link_layer(cap.get_datalink())?;
        Ok(PacketCapturer { cap, link })
    }

    pub fn link(&self) -> LinkLayer {
        self.link
    }

    pub fn savefile(&self, path: &Path) -> Result<Savefile> {
        self.cap
            .savefile(path)
            .with_context(|| format!("Failed to create {}", path.display()))
    }

    pub fn next_packet(&mut self) -> Result<Packet<'_>, pcap::Error> {
        self.cap.next_packet()
    }

    /// Logs the kernel's receive and drop counters.
    pub fn log_stats(&mut self) {
        match self.cap.stats() {
            Ok(stats) => info!(
                "Capture stats: received {}, dropped {}, dropped by interface {}",
                stats.received, stats.dropped, stats.if_dropped
            ),
            Err(e) => warn!("Could not read capture stats: {}", e),
        }
    }

    /**
     *  Start the asynchronous packet capturing loop
     */
    pub fn start_capture_loop(mut self, sender: PacketSender, stop: Arc<AtomicBool>) -> task::JoinHandle<()> {
        // Capture needs to be in a blocking task since pcap::Capture is blocking
        task::spawn_blocking(move || {
            let mut errors = ErrorStreak::default();
            while !stop.load(Ordering::Relaxed) {
                match self.cap.next_packet() {
                    Ok(packet) => {
                        errors.reset();
                        let packet = OwnedPacket::from(packet);
                        if sender.send(packet).is_err() {
                            // Receiver has been dropped
                            error!("Receiver dropped. Stopping packet capture.");
                            break;
                        }
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(e) => {
                        error!("Error capturing packet: {}", e);
                        if errors.fail() {
                            error!(
                                "Stopping packet capture after {} consecutive errors",
                                errors.count()
                            );
                            break;
                        }
                    }
                }
            }
            self.log_stats();
        })
    }
}
