use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use log::warn;
use serde::Serialize;
use std::io::Write;

use crate::{CompletedFlow, CompletionReason, FlowPhase, IncompleteFlow};

/// Final result of a run: completed flows ranked by duration, plus any flows
/// that were evicted or still open when the input ended.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Report {
    pub completed: Vec<CompletedFlow>,
    pub incomplete: Vec<IncompleteFlow>,
}

#[derive(Serialize)]
struct CompletedRecord {
    flow: String,
    duration_secs: f64,
    begin: String,
    end: String,
    reason: CompletionReason,
}

#[derive(Serialize)]
struct IncompleteRecord {
    flow: String,
    begin: String,
    last_seen: String,
    phase: FlowPhase,
}

#[derive(Serialize)]
struct JsonReport {
    completed: Vec<CompletedRecord>,
    incomplete: Vec<IncompleteRecord>,
}

/// RFC 3339 rendering of a capture timestamp, raw micros if out of range.
fn format_micros(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_else(|| micros.to_string())
}

impl Report {
    pub fn new(completed: Vec<CompletedFlow>, incomplete: Vec<IncompleteFlow>) -> Self {
        Report {
            completed,
            incomplete,
        }
    }

    /// Keeps only the `n` shortest completed flows.
    pub fn truncate(&mut self, n: usize) {
        self.completed.truncate(n);
    }

    /// One `<flow> : <seconds>` line per completed flow.
    /// A line that cannot be written is logged and skipped; returns how many
    /// lines were written.
    pub fn write_text<W: Write>(&self, out: &mut W) -> Result<usize> {
        let mut written = 0;
        for flow in &self.completed {
            match writeln!(out, "{} : {:.6}", flow.key, flow.duration) {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to write report line for {}: {}", flow.key, e),
            }
        }
        if !self.incomplete.is_empty() {
            if let Err(e) = writeln!(out, "# incomplete") {
                warn!("Failed to write report section header: {}", e);
            }
            for flow in &self.incomplete {
                let line = writeln!(
                    out,
                    "{} : open since {} (last seen {}, {:?})",
                    flow.key,
                    format_micros(flow.begin),
                    format_micros(flow.last_seen),
                    flow.phase
                );
                match line {
                    Ok(()) => written += 1,
                    Err(e) => warn!("Failed to write report line for {}: {}", flow.key, e),
                }
            }
        }
        out.flush().context("Failed to flush report")?;
        Ok(written)
    }

    pub fn write_json<W: Write>(&self, out: &mut W) -> Result<()> {
        let report = JsonReport {
            completed: self
                .completed
                .iter()
                .map(|f| CompletedRecord {
                    flow: f.key.to_string(),
                    duration_secs: f.duration,
                    begin: format_micros(f.begin),
                    end: format_micros(f.end),
                    reason: f.reason,
                })
                .collect(),
            incomplete: self
                .incomplete
                .iter()
                .map(|f| IncompleteRecord {
                    flow: f.key.to_string(),
                    begin: format_micros(f.begin),
                    last_seen: format_micros(f.last_seen),
                    phase: f.phase,
                })
                .collect(),
        };
        serde_json::to_writer_pretty(&mut *out, &report).context("Failed to write JSON report")?;
        writeln!(out).context("Failed to write JSON report")?;
        out.flush().context("Failed to flush report")?;
        Ok(())
    }
}
