use log::trace;
use serde::Serialize;

use crate::{PacketSignal, Settings};

use super::completion::CompletionReason;

/// Where a tracked connection is in its lifecycle.
///
/// `Absent` and `Completed` are not represented: an absent flow has no tracker
/// and a completed one is removed from the registry as soon as it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    /// Initial SYN seen, no FIN yet.
    Open,
    /// A FIN was seen from either side; counts ACKs observed since.
    FinPending { acks: u8 },
}

/// Outcome of feeding one signal to a tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ignored,
    FinSeen,
    FinAck(u8),
    Completed(CompletionReason),
}

/// Per-connection handshake/teardown state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTracker {
    begin: i64,
    last_seen: i64,
    phase: FlowPhase,
}

impl TcpTracker {
    /// Starts tracking at the timestamp of the initial SYN.
    pub fn new(begin: i64) -> Self {
        TcpTracker {
            begin,
            last_seen: begin,
            phase: FlowPhase::Open,
        }
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    /// Advances the state machine by one signal.
    ///
    /// Rules are tried in order: initial SYN, RST, first FIN, post-FIN ACK.
    /// The first rule whose flags match decides the outcome, so a FIN|ACK
    /// segment is handled as a FIN and a SYN|ACK as an ACK.
    /// A `Completed` result means the caller must drop this tracker.
    pub fn register_signal(&mut self, signal: &PacketSignal) -> Transition {
        let flags = signal.flags;
        self.last_seen = self.last_seen.max(signal.timestamp);

        let transition = if flags.is_initial_syn() {
            // The flow already exists, its begin time is authoritative.
            Transition::Ignored
        } else if flags.is_rst() {
            Transition::Completed(CompletionReason::Reset)
        } else if flags.is_fin() {
            match self.phase {
                FlowPhase::Open => {
                    self.phase = FlowPhase::FinPending { acks: 0 };
                    Transition::FinSeen
                }
                FlowPhase::FinPending { .. } => Transition::Ignored,
            }
        } else if flags.is_ack() {
            match self.phase {
                FlowPhase::Open => Transition::Ignored,
                FlowPhase::FinPending { acks } => {
                    let acks = acks + 1;
                    self.phase = FlowPhase::FinPending { acks };
                    if acks >= Settings::FIN_ACK_THRESHOLD {
                        Transition::Completed(CompletionReason::Teardown)
                    } else {
                        Transition::FinAck(acks)
                    }
                }
            }
        } else {
            Transition::Ignored
        };

        trace!(
            "{} -> {} [{}] at {}: {:?}",
            signal.src,
            signal.dst,
            flags,
            signal.timestamp,
            transition
        );
        transition
    }
}
