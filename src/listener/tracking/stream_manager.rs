use log::{debug, info};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use crate::PacketSignal;

use super::completion::{CompletedFlow, IncompleteFlow};
use super::stream_id::FlowKey;
use super::tcp_tracker::{TcpTracker, Transition};

/// StreamManager keeps track of every connection that has been opened but not
/// yet closed, and drives their state machines.
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<FlowKey, TcpTracker>,
    /// Flows idle for longer than this (in capture time) are evicted.
    idle_timeout: Option<i64>,
    sweep_interval: i64,
    last_sweep: Option<i64>,
}

/// Whole microseconds, saturating at `i64::MAX` so huge timeouts mean "never".
fn to_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new(None, crate::Settings::SWEEP_INTERVAL)
    }
}

impl StreamManager {
    pub fn new(idle_timeout: Option<Duration>, sweep_interval: Duration) -> Self {
        StreamManager {
            streams: HashMap::new(),
            idle_timeout: idle_timeout.map(to_micros),
            sweep_interval: to_micros(sweep_interval),
            last_sweep: None,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&TcpTracker> {
        self.streams.get(key)
    }

    /// Routes one signal to its flow. Returns the completed flow if this
    /// signal closed it; the flow is no longer tracked afterwards.
    pub fn record_signal(&mut self, signal: &PacketSignal) -> Option<CompletedFlow> {
        let key = FlowKey::from_signal(signal);

        let mut entry = match self.streams.entry(key) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(entry) => {
                if signal.flags.is_initial_syn() {
                    debug!("Flow {} opened at {}", key, signal.timestamp);
                    entry.insert(TcpTracker::new(signal.timestamp));
                }
                return None;
            }
        };

        match entry.get_mut().register_signal(signal) {
            Transition::Completed(reason) => {
                let tracker = entry.remove();
                Some(CompletedFlow::new(key, tracker.begin(), signal.timestamp, reason))
            }
            _ => None,
        }
    }

    /// Runs [`Self::sweep_idle`] once capture time has moved a full sweep
    /// interval past the previous sweep. Does nothing without an idle timeout.
    pub fn periodic(&mut self, now: i64) -> Vec<IncompleteFlow> {
        if self.idle_timeout.is_none() {
            return Vec::new();
        }
        match self.last_sweep {
            None => {
                self.last_sweep = Some(now);
                Vec::new()
            }
            Some(last) if now - last >= self.sweep_interval => {
                self.last_sweep = Some(now);
                self.sweep_idle(now)
            }
            Some(_) => Vec::new(),
        }
    }

    /// Evicts flows whose last activity is older than the idle timeout.
    pub fn sweep_idle(&mut self, now: i64) -> Vec<IncompleteFlow> {
        let timeout = match self.idle_timeout {
            Some(timeout) => timeout,
            None => return Vec::new(),
        };
        let expired: Vec<FlowKey> = self
            .streams
            .iter()
            .filter(|(_, t)| now - t.last_seen() > timeout)
            .map(|(k, _)| *k)
            .collect();
        let evicted = self.take_streams(expired);
        if !evicted.is_empty() {
            info!(
                "Evicted {} idle flows, {} still tracked",
                evicted.len(),
                self.streams.len()
            );
        }
        evicted
    }

    /// Removes every tracked flow, e.g. at end of stream.
    pub fn drain(&mut self) -> Vec<IncompleteFlow> {
        let keys: Vec<FlowKey> = self.streams.keys().copied().collect();
        self.take_streams(keys)
    }

    /// Removes the given flows, returned by begin time then key.
    fn take_streams(&mut self, keys: Vec<FlowKey>) -> Vec<IncompleteFlow> {
        let mut taken: Vec<IncompleteFlow> = keys
            .into_iter()
            .filter_map(|key| {
                self.streams.remove(&key).map(|tracker| IncompleteFlow {
                    key,
                    begin: tracker.begin(),
                    last_seen: tracker.last_seen(),
                    phase: tracker.phase(),
                })
            })
            .collect();
        taken.sort_by(|a, b| a.begin.cmp(&b.begin).then(a.key.cmp(&b.key)));
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompletionReason, Endpoint, FlowPhase, TcpFlags};
    use std::net::{IpAddr, Ipv4Addr};

    const SYN: u8 = TcpFlags::SYN;
    const ACK: u8 = TcpFlags::ACK;
    const FIN: u8 = TcpFlags::FIN;
    const RST: u8 = TcpFlags::RST;

    fn client(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10)), port)
    }

    fn server() -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 80)
    }

    /// Client to server segment.
    fn c2s(ts: i64, port: u16, flags: u8) -> PacketSignal {
        PacketSignal::new(ts, client(port), server(), TcpFlags::new(flags))
    }

    /// Server to client segment.
    fn s2c(ts: i64, port: u16, flags: u8) -> PacketSignal {
        PacketSignal::new(ts, server(), client(port), TcpFlags::new(flags))
    }

    fn feed(manager: &mut StreamManager, signals: &[PacketSignal]) -> Vec<CompletedFlow> {
        signals
            .iter()
            .filter_map(|s| manager.record_signal(s))
            .collect()
    }

    #[test]
    fn test_rst_short_circuit() {
        let mut manager = StreamManager::default();
        let done = feed(&mut manager, &[c2s(1_000, 1, SYN), s2c(501_000, 1, RST)]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].reason, CompletionReason::Reset);
        assert_eq!(done[0].begin, 1_000);
        assert_eq!(done[0].end, 501_000);
        assert!((done[0].duration - 0.5).abs() < 1e-12);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_full_teardown_across_directions() {
        let mut manager = StreamManager::default();
        let done = feed(
            &mut manager,
            &[
                c2s(0, 1, SYN),
                s2c(100, 1, SYN | ACK),
                c2s(200, 1, ACK),
                c2s(300, 1, ACK),
                c2s(1_000_000, 1, FIN | ACK),
                s2c(1_000_100, 1, ACK),
                s2c(1_000_200, 1, FIN | ACK),
                c2s(1_000_300, 1, ACK),
            ],
        );
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].reason, CompletionReason::Teardown);
        assert_eq!(done[0].end, 1_000_300);
        assert_eq!(done[0].key, FlowKey::new(client(1), server()));
    }

    #[test]
    fn test_no_premature_completion() {
        let mut manager = StreamManager::default();
        let done = feed(
            &mut manager,
            &[c2s(0, 1, SYN), c2s(10, 1, ACK), c2s(20, 1, FIN), s2c(30, 1, ACK)],
        );
        assert!(done.is_empty());
        let key = FlowKey::new(client(1), server());
        assert_eq!(manager.get(&key).unwrap().phase(), FlowPhase::FinPending { acks: 1 });
    }

    #[test]
    fn test_exactly_once_completion() {
        let mut manager = StreamManager::default();
        let done = feed(
            &mut manager,
            &[
                c2s(0, 1, SYN),
                c2s(10, 1, RST),
                s2c(20, 1, RST),
                c2s(30, 1, FIN),
                c2s(40, 1, ACK),
                c2s(50, 1, ACK),
            ],
        );
        assert_eq!(done.len(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_signals_without_syn_ignored() {
        let mut manager = StreamManager::default();
        let done = feed(
            &mut manager,
            &[s2c(0, 1, SYN | ACK), c2s(10, 1, FIN), c2s(20, 1, ACK), c2s(30, 1, ACK), c2s(40, 1, RST)],
        );
        assert!(done.is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_second_syn_keeps_begin() {
        let mut manager = StreamManager::default();
        let done = feed(&mut manager, &[c2s(0, 1, SYN), c2s(3_000_000, 1, SYN), c2s(4_000_000, 1, RST)]);
        assert_eq!(done[0].begin, 0);
        assert!((done[0].duration - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_new_syn_after_completion_starts_new_flow() {
        let mut manager = StreamManager::default();
        let done = feed(
            &mut manager,
            &[c2s(0, 1, SYN), c2s(10, 1, RST), c2s(100, 1, SYN), c2s(150, 1, RST)],
        );
        assert_eq!(done.len(), 2);
        assert_eq!(done[1].begin, 100);
        assert_eq!(done[1].end, 150);
    }

    #[test]
    fn test_interleaved_flows() {
        let mut manager = StreamManager::default();
        let done = feed(
            &mut manager,
            &[
                c2s(0, 1, SYN),
                c2s(5, 2, SYN),
                c2s(10, 2, RST),
                c2s(20, 1, FIN),
                s2c(30, 1, ACK),
                s2c(40, 1, ACK),
            ],
        );
        let ports: Vec<u16> = done.iter().map(|f| f.key.high().port).collect();
        assert_eq!(ports, vec![2, 1]);
    }

    #[test]
    fn test_sweep_idle_evicts_only_stale_flows() {
        let mut manager = StreamManager::new(Some(Duration::from_secs(10)), Duration::from_secs(1));
        feed(
            &mut manager,
            &[
                c2s(0, 1, SYN),
                c2s(5_000_000, 2, SYN),
                c2s(9_000_000, 1, ACK),
                s2c(12_000_000, 2, ACK),
            ],
        );

        assert!(manager.sweep_idle(15_000_000).is_empty());

        let evicted = manager.sweep_idle(19_500_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, FlowKey::new(client(1), server()));
        assert_eq!(evicted[0].last_seen, 9_000_000);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_periodic_waits_for_sweep_interval() {
        let mut manager = StreamManager::new(Some(Duration::from_secs(1)), Duration::from_secs(60));
        feed(&mut manager, &[c2s(0, 1, SYN)]);
        assert!(manager.periodic(0).is_empty());
        assert!(manager.periodic(30_000_000).is_empty());
        assert_eq!(manager.periodic(60_000_000).len(), 1);
    }

    #[test]
    fn test_huge_timeout_never_evicts() {
        let mut manager = StreamManager::new(Some(Duration::from_secs(u64::MAX / 1000)), Duration::MAX);
        feed(&mut manager, &[c2s(0, 1, SYN)]);
        assert!(manager.sweep_idle(1).is_empty());
        assert!(manager.sweep_idle(i64::MAX).is_empty());
        assert!(manager.periodic(0).is_empty());
        assert!(manager.periodic(i64::MAX).is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_periodic_disabled_without_timeout() {
        let mut manager = StreamManager::default();
        feed(&mut manager, &[c2s(0, 1, SYN)]);
        assert!(manager.periodic(0).is_empty());
        assert!(manager.periodic(i64::MAX / 2).is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_drain_sorted_by_begin() {
        let mut manager = StreamManager::default();
        feed(&mut manager, &[c2s(30, 3, SYN), c2s(10, 1, SYN), c2s(20, 2, SYN), c2s(40, 2, FIN)]);
        let drained = manager.drain();
        let begins: Vec<i64> = drained.iter().map(|f| f.begin).collect();
        assert_eq!(begins, vec![10, 20, 30]);
        assert_eq!(drained[1].phase, FlowPhase::FinPending { acks: 0 });
        assert!(manager.is_empty());
    }
}
