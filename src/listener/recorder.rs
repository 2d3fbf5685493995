use anyhow::{bail, Context, Result};
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

use super::capture::{ErrorStreak, PacketCapturer};
use crate::config::Capture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Elapsed,
    PacketLimit,
    Interrupted,
}

/// When a recording should end. With no limits it runs until interrupted.
#[derive(Debug, Clone, Copy)]
pub struct StopCondition {
    duration: Option<Duration>,
    max_packets: Option<usize>,
}

impl StopCondition {
    pub fn new(duration: Option<Duration>, max_packets: Option<usize>) -> Self {
        StopCondition {
            duration,
            max_packets,
        }
    }

    /// `elapsed` is measured from the start of the recording.
    pub fn check(&self, elapsed: Duration, packets: usize) -> Option<StopReason> {
        if self.max_packets.is_some_and(|max| packets >= max) {
            return Some(StopReason::PacketLimit);
        }
        if self.duration.is_some_and(|limit| elapsed >= limit) {
            return Some(StopReason::Elapsed);
        }
        None
    }
}

#[derive(Debug)]
pub struct RecordSummary {
    pub packets: usize,
    pub elapsed: Duration,
    pub reason: StopReason,
}

/// Writes every frame accepted by the capture filter to a pcap savefile.
pub struct Recorder {
    capturer: PacketCapturer,
    output: PathBuf,
    condition: StopCondition,
}

impl Recorder {
    pub fn new(capturer: PacketCapturer, config: &Capture) -> Self {
        Recorder {
            capturer,
            output: config.output.clone(),
            condition: StopCondition::new(config.duration, config.max_packets),
        }
    }

    /// Runs the recording on a blocking thread until a stop condition is met
    /// or `stop` is raised.
    pub fn start(self, stop: Arc<AtomicBool>) -> task::JoinHandle<Result<RecordSummary>> {
        task::spawn_blocking(move || self.record(&stop))
    }

    fn record(mut self, stop: &AtomicBool) -> Result<RecordSummary> {
        let mut savefile = self.capturer.savefile(&self.output)?;
        info!("Capturing to {}", self.output.display());

        let start = Instant::now();
        let mut packets = 0;
        let mut errors = ErrorStreak::default();
        let reason = loop {
            if stop.load(Ordering::Relaxed) {
                break StopReason::Interrupted;
            }
            if let Some(reason) = self.condition.check(start.elapsed(), packets) {
                break reason;
            }
            match self.capturer.next_packet() {
                Ok(packet) => {
                    savefile.write(&packet);
                    packets += 1;
                    errors.reset();
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    error!("Error capturing packet: {}", e);
                    if errors.fail() {
                        savefile.flush().ok();
                        bail!("Giving up after {} consecutive capture errors", errors.count());
                    }
                }
            }
        };

        savefile
            .flush()
            .with_context(|| format!("Failed to flush {}", self.output.display()))?;
        self.capturer.log_stats();

        Ok(RecordSummary {
            packets,
            elapsed: start.elapsed(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_stops() {
        let condition = StopCondition::new(None, None);
        assert_eq!(condition.check(Duration::from_secs(86_400), usize::MAX), None);
    }

    #[test]
    fn test_stops_after_duration() {
        let condition = StopCondition::new(Some(Duration::from_secs(10)), None);
        assert_eq!(condition.check(Duration::from_secs(9), 1_000), None);
        assert_eq!(
            condition.check(Duration::from_secs(10), 1_000),
            Some(StopReason::Elapsed)
        );
    }

    #[test]
    fn test_stops_after_packet_count() {
        let condition = StopCondition::new(Some(Duration::from_secs(10)), Some(5));
        assert_eq!(condition.check(Duration::ZERO, 4), None);
        assert_eq!(condition.check(Duration::ZERO, 5), Some(StopReason::PacketLimit));
    }

    #[test]
    fn test_elapsed_grows_from_start() {
        let condition = StopCondition::new(Some(Duration::from_millis(20)), None);
        let start = Instant::now();
        assert_eq!(condition.check(start.elapsed(), 0), None);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(condition.check(start.elapsed(), 0), Some(StopReason::Elapsed));
    }
}
