use log::info;
use pnet::packet::ip::IpNextHeaderProtocols;

use crate::{ParsedPacket, Skipped};

/// Per-run frame counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Analyzer {
    pub frames: usize,
    pub bytes: usize,
    pub tcp: usize,
    pub udp: usize,
    pub other: usize,
    pub not_ip: usize,
    pub fragments: usize,
    pub read_errors: usize,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_packet(&mut self, len: usize, parsed: &Result<ParsedPacket, Skipped>) {
        self.frames += 1;
        self.bytes += len;
        match parsed {
            Ok(packet) => match packet.transport().get_ip_proto() {
                IpNextHeaderProtocols::Tcp => self.tcp += 1,
                IpNextHeaderProtocols::Udp => self.udp += 1,
                _ => self.other += 1,
            },
            Err(Skipped::NotIp) => self.not_ip += 1,
            Err(Skipped::Fragment) => self.fragments += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.read_errors += 1;
    }

    pub fn log_summary(&self) {
        info!(
            "Frames: {} | MB: {:.3} | tcp: {} | udp: {} | other ip: {} | non-ip: {} | fragments: {} | read errors: {}",
            self.frames,
            self.bytes as f64 / 1_000_000.0,
            self.tcp,
            self.udp,
            self.other,
            self.not_ip,
            self.fragments,
            self.read_errors
        );
    }
}
