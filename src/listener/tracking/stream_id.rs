use std::fmt::{self, Display};
use std::hash::Hash;

use crate::{Endpoint, PacketSignal};

/// Canonical identity of a TCP connection, independent of packet direction.
pub type FlowKey = Pair<Endpoint>;

pub trait Pairable: Ord + Eq + Hash + Clone + Copy {}
impl<T: Ord + Eq + Hash + Clone + Copy> Pairable for T {}

/// Unordered pair stored in canonical order: the smaller element first.
///
/// Because the order is fixed at construction, the derived `Eq` and `Hash`
/// treat `(a, b)` and `(b, a)` as the same pair.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pair<T: Pairable> {
    low: T,
    high: T,
}

impl<T: Pairable> Pair<T> {
    pub fn new(a: T, b: T) -> Self {
        if b < a {
            Pair { low: b, high: a }
        } else {
            Pair { low: a, high: b }
        }
    }

    pub fn low(&self) -> T {
        self.low
    }

    pub fn high(&self) -> T {
        self.high
    }
}

impl Pair<Endpoint> {
    pub fn from_signal(signal: &PacketSignal) -> Self {
        Pair::new(signal.src, signal.dst)
    }
}

impl Display for Pair<Endpoint> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use super::*;
    use crate::TcpFlags;

    fn ep(ip: [u8; 4], port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::from(ip)), port)
    }

    #[test]
    fn test_pair() {
        let pair = Pair::new(1, 2);
        assert_eq!(pair.low(), 1);
        assert_eq!(pair.high(), 2);
    }

    #[test]
    fn test_pair_eq() {
        let pair1 = Pair::new(1, 2);
        let pair2 = Pair::new(2, 1);
        assert_eq!(pair1, pair2);
        assert_eq!(pair1, pair1);
    }

    #[test]
    fn test_flow_key_symmetric() {
        let pairs = [
            (ep([10, 0, 0, 1], 40000), ep([10, 0, 0, 2], 80)),
            (ep([10, 0, 0, 2], 40000), ep([10, 0, 0, 1], 80)),
            (ep([10, 0, 0, 1], 443), ep([10, 0, 0, 1], 80)),
            (ep([1, 1, 1, 1], 53), ep([1, 1, 1, 1], 53)),
            (
                ep([127, 0, 0, 1], 8080),
                Endpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8080),
            ),
        ];
        for (a, b) in pairs {
            assert_eq!(FlowKey::new(a, b), FlowKey::new(b, a));
            assert_eq!(FlowKey::new(a, b).to_string(), FlowKey::new(b, a).to_string());
        }
    }

    #[test]
    fn test_flow_key_hashes_both_directions_together() {
        let client = ep([192, 168, 1, 10], 51000);
        let server = ep([93, 184, 216, 34], 443);
        let mut map = HashMap::new();
        map.insert(FlowKey::new(client, server), 1);
        assert_eq!(map.get(&FlowKey::new(server, client)), Some(&1));
    }

    #[test]
    fn test_flow_key_display_smaller_endpoint_first() {
        let key = FlowKey::new(ep([10, 0, 0, 2], 80), ep([10, 0, 0, 1], 40000));
        assert_eq!(key.to_string(), "10.0.0.1:40000-10.0.0.2:80");

        let same_host = FlowKey::new(ep([10, 0, 0, 1], 443), ep([10, 0, 0, 1], 80));
        assert_eq!(same_host.to_string(), "10.0.0.1:80-10.0.0.1:443");
    }

    #[test]
    fn test_flow_key_from_signal() {
        let request = PacketSignal::new(
            0,
            ep([10, 0, 0, 1], 40000),
            ep([10, 0, 0, 2], 80),
            TcpFlags::new(TcpFlags::SYN),
        );
        let response = PacketSignal::new(
            5,
            ep([10, 0, 0, 2], 80),
            ep([10, 0, 0, 1], 40000),
            TcpFlags::new(TcpFlags::SYN | TcpFlags::ACK),
        );
        assert_eq!(FlowKey::from_signal(&request), FlowKey::from_signal(&response));
    }

    #[test]
    fn test_different_ports_are_different_flows() {
        let a = FlowKey::new(ep([10, 0, 0, 1], 40000), ep([10, 0, 0, 2], 80));
        let b = FlowKey::new(ep([10, 0, 0, 1], 40001), ep([10, 0, 0, 2], 80));
        assert_ne!(a, b);
    }
}
