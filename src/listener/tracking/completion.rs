use log::debug;
use serde::Serialize;

use crate::Settings;

use super::stream_id::FlowKey;
use super::tcp_tracker::FlowPhase;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// RST from either side.
    Reset,
    /// FIN followed by the acknowledgments closing both halves.
    Teardown,
}

/// Snapshot of a connection taken at the moment it closed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFlow {
    pub key: FlowKey,
    pub begin: i64,
    pub end: i64,
    pub duration: f64,
    pub reason: CompletionReason,
}

impl CompletedFlow {
    pub fn new(key: FlowKey, begin: i64, end: i64, reason: CompletionReason) -> Self {
        CompletedFlow {
            key,
            begin,
            end,
            duration: (end - begin) as f64 / Settings::MICROS_PER_SEC,
            reason,
        }
    }
}

/// Snapshot of a connection that was still open when it was evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteFlow {
    pub key: FlowKey,
    pub begin: i64,
    pub last_seen: i64,
    pub phase: FlowPhase,
}

/// Accumulates finished flows in emission order.
#[derive(Debug, Default)]
pub struct CompletionCollector {
    completed: Vec<CompletedFlow>,
    incomplete: Vec<IncompleteFlow>,
}

impl CompletionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flow: CompletedFlow) {
        debug!(
            "Flow {} closed by {:?} after {:.6}s",
            flow.key, flow.reason, flow.duration
        );
        self.completed.push(flow);
    }

    pub fn push_incomplete(&mut self, flows: impl IntoIterator<Item = IncompleteFlow>) {
        self.incomplete.extend(flows);
    }

    pub fn completed(&self) -> &[CompletedFlow] {
        &self.completed
    }

    pub fn incomplete(&self) -> &[IncompleteFlow] {
        &self.incomplete
    }

    /// Completed flows sorted by ascending duration.
    /// The sort is stable, equal durations keep their emission order.
    pub fn ranked(&self) -> Vec<CompletedFlow> {
        let mut ranked = self.completed.clone();
        ranked.sort_by(|a, b| a.duration.total_cmp(&b.duration));
        ranked
    }

    pub fn into_parts(self) -> (Vec<CompletedFlow>, Vec<IncompleteFlow>) {
        let mut completed = self.completed;
        completed.sort_by(|a, b| a.duration.total_cmp(&b.duration));
        (completed, self.incomplete)
    }
}
