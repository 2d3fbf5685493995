use anyhow::{bail, Result};
use log::{info, warn};

use super::analyzer::Analyzer;
use super::capture::{CaptureFile, ErrorStreak, OwnedPacket, PacketReceiver};
use crate::config::{Analysis, IncompletePolicy};
use crate::report::Report;
use crate::{
    CompletionCollector, IncompleteFlow, LinkLayer, PacketSignal, ParsedPacket, Skipped,
    StreamManager,
};

/// Drives captured frames through flow tracking and collects the results.
///
/// Frames must arrive in capture order; nothing is buffered or re-sorted.
pub struct Parser {
    link: LinkLayer,
    stream_manager: StreamManager,
    collector: CompletionCollector,
    analyzer: Analyzer,
    incomplete: IncompletePolicy,
    incomplete_count: usize,
}

impl Parser {
    pub fn new(link: LinkLayer, config: &Analysis) -> Self {
        Parser {
            link,
            stream_manager: StreamManager::new(config.idle_timeout, config.sweep_interval),
            collector: CompletionCollector::new(),
            analyzer: Analyzer::new(),
            incomplete: config.incomplete,
            incomplete_count: 0,
        }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn stream_manager(&self) -> &StreamManager {
        &self.stream_manager
    }

    /// Reads a whole capture file. Unreadable records are skipped, but too
    /// many in a row abort the run.
    pub fn run_offline(mut self, file: CaptureFile) -> Result<Report> {
        let mut errors = ErrorStreak::default();
        for packet in file {
            match packet {
                Ok(packet) => {
                    errors.reset();
                    self.handle_capture(&packet);
                }
                Err(e) => {
                    warn!("Skipping unreadable record: {}", e);
                    self.analyzer.record_error();
                    if errors.fail() {
                        bail!("Giving up after {} consecutive read errors: {}", errors.count(), e);
                    }
                }
            }
        }
        Ok(self.finish())
    }

    /// Consumes live packets until the sender goes away or Ctrl-C is pressed.
    pub async fn start(mut self, mut packet_stream: PacketReceiver) -> Report {
        loop {
            tokio::select! {
                packet = packet_stream.recv() => match packet {
                    Some(packet) => self.handle_capture(&packet),
                    None => {
                        info!("Packet stream closed");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C");
                    break;
                },
            }
        }
        self.finish()
    }

    pub fn handle_capture(&mut self, packet: &OwnedPacket) {
        let parsed = self.parse_packet(packet);
        self.analyzer.process_packet(packet.header.len as usize, &parsed);

        if let Some(signal) = parsed.ok().and_then(|p| p.signal()) {
            self.handle_signal(&signal);
        }
    }

    pub fn handle_signal(&mut self, signal: &PacketSignal) {
        if let Some(flow) = self.stream_manager.record_signal(signal) {
            self.collector.push(flow);
        }
        let evicted = self.stream_manager.periodic(signal.timestamp);
        self.keep_incomplete(evicted);
    }

    /* Parses an `OwnedPacket` according to the capture's link layer.
     * Returns why the frame was skipped if it carries no usable IP header.
     */
    pub fn parse_packet(&self, packet: &OwnedPacket) -> Result<ParsedPacket, Skipped> {
        ParsedPacket::from_packet(packet, self.link)
    }

    /// Flushes every still-open flow and produces the ranked report.
    pub fn finish(mut self) -> Report {
        let remaining = self.stream_manager.drain();
        self.keep_incomplete(remaining);
        self.analyzer.log_summary();

        let (completed, incomplete) = self.collector.into_parts();
        info!(
            "{} completed flows, {} incomplete flows {}",
            completed.len(),
            self.incomplete_count,
            match self.incomplete {
                IncompletePolicy::Drop => "dropped",
                IncompletePolicy::Report => "reported",
            }
        );
        Report::new(completed, incomplete)
    }

    fn keep_incomplete(&mut self, flows: Vec<IncompleteFlow>) {
        self.incomplete_count += flows.len();
        if self.incomplete == IncompletePolicy::Report {
            self.collector.push_incomplete(flows);
        }
    }
}
