use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::net::{IpAddr, SocketAddr};

use super::TcpFlags;

/// One side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Endpoint { addr, port }
    }

    /// Address in its uniform 16-byte form. IPv4 is mapped into `::ffff:a.b.c.d`.
    pub fn uniform_addr(&self) -> [u8; 16] {
        match self.addr {
            IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
            IpAddr::V6(ip) => ip.octets(),
        }
    }
}

impl Ord for Endpoint {
    /// Addresses are compared byte-wise in uniform form; ports only break ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.uniform_addr()
            .cmp(&other.uniform_addr())
            .then(self.port.cmp(&other.port))
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip(), addr.port())
    }
}

/// Lifecycle-relevant view of a single TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSignal {
    /// Capture timestamp in microseconds since the epoch.
    pub timestamp: i64,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub flags: TcpFlags,
}

impl PacketSignal {
    pub fn new(timestamp: i64, src: Endpoint, dst: Endpoint, flags: TcpFlags) -> Self {
        PacketSignal {
            timestamp,
            src,
            dst,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sock(s: &str) -> Endpoint {
        Endpoint::from(s.parse::<SocketAddr>().unwrap())
    }

    fn v4(a: u8, b: u8, c: u8, d: u8, port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
    }

    #[test]
    fn test_uniform_addr_maps_ipv4() {
        let ep = v4(10, 0, 0, 1, 80);
        let mapped = Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped();
        assert_eq!(ep.uniform_addr(), mapped.octets());
    }

    #[test]
    fn test_endpoint_order_by_address_first() {
        assert!(v4(10, 0, 0, 1, 9000) < v4(10, 0, 0, 2, 1));
        assert!(v4(192, 168, 0, 1, 1) > v4(10, 0, 0, 1, 65535));
    }

    #[test]
    fn test_endpoint_order_port_breaks_ties() {
        assert!(v4(10, 0, 0, 1, 80) < v4(10, 0, 0, 1, 443));
        assert_eq!(v4(10, 0, 0, 1, 80).cmp(&v4(10, 0, 0, 1, 80)), Ordering::Equal);
    }

    #[test]
    fn test_ipv4_sorts_against_ipv6_in_mapped_form() {
        // ::ffff:0:0/96 sits above ::1 and below 2001::/16
        let loopback6 = sock("[::1]:80");
        let global6 = sock("[2001:db8::1]:80");
        let v4ep = v4(127, 0, 0, 1, 80);
        assert!(loopback6 < v4ep);
        assert!(v4ep < global6);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(v4(1, 2, 3, 4, 80).to_string(), "1.2.3.4:80");
        assert_eq!(sock("[fe80::1]:22").to_string(), "fe80::1:22");
    }
}
