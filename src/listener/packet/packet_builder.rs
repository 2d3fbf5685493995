use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::vlan::VlanPacket;
use std::net::IpAddr;

use super::{Endpoint, PacketSignal, TcpFlags, TransportPacket};
use crate::listener::capture::OwnedPacket;
use crate::Settings;

const WORD_SIZE: usize = 4;
// BSD loopback address family values for IPv6 differ per platform.
const AF_INET: u32 = 2;
const AF_INET6: [u32; 3] = [24, 28, 30];

/// Converts a pcap timeval to microseconds since the epoch.
/// The capture is opened with microsecond precision, so `tv_usec` is taken as is.
pub fn timeval_to_micros(tv: libc::timeval) -> i64 {
    tv.tv_sec as i64 * 1_000_000 + tv.tv_usec as i64
}

/// Link-layer framing of a capture, derived from its pcap link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// BSD loopback encapsulation (DLT_NULL / DLT_LOOP).
    Null,
    /// Linux cooked capture v1.
    LinuxSll,
    /// Bare IPv4 or IPv6 packets.
    RawIp,
}

impl LinkLayer {
    pub fn from_linktype(linktype: pcap::Linktype) -> Option<Self> {
        match linktype.0 {
            1 => Some(LinkLayer::Ethernet),
            0 | 108 => Some(LinkLayer::Null),
            113 => Some(LinkLayer::LinuxSll),
            12 | 14 | 101 | 228 | 229 => Some(LinkLayer::RawIp),
            _ => None,
        }
    }
}

/// IP header fields relevant to flow identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpLayer {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: IpNextHeaderProtocol,
}

/// Why a frame did not produce a [`ParsedPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skipped {
    /// No IPv4/IPv6 header could be found in the frame.
    NotIp,
    /// Non-first IPv4 fragment, which carries no transport header.
    Fragment,
}

/// Typed view over a captured frame.
///
/// Layers that are not present come back as `None` from their accessor instead
/// of requiring the caller to probe and cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub timestamp: i64,
    ip: IpLayer,
    transport: TransportPacket,
}

impl ParsedPacket {
    /// Parses a captured frame according to the capture's link layer.
    pub fn from_packet(packet: &OwnedPacket, link: LinkLayer) -> Result<ParsedPacket, Skipped> {
        let timestamp = timeval_to_micros(packet.header.ts);
        let (ip, payload) = Self::get_ip_info(&packet.data, link)?;
        let transport = TransportPacket::from_data(payload, ip.protocol);

        Ok(ParsedPacket {
            timestamp,
            ip,
            transport,
        })
    }

    pub fn ip(&self) -> &IpLayer {
        &self.ip
    }

    pub fn transport(&self) -> &TransportPacket {
        &self.transport
    }

    /// Returns `(src_port, dst_port, flags)` if the frame carries TCP.
    pub fn tcp(&self) -> Option<(u16, u16, TcpFlags)> {
        match self.transport {
            TransportPacket::TCP {
                src_port,
                dst_port,
                flags,
            } => Some((src_port, dst_port, flags)),
            _ => None,
        }
    }

    /// Lifecycle signal for the state machine, `None` for anything but TCP.
    pub fn signal(&self) -> Option<PacketSignal> {
        let (src_port, dst_port, flags) = self.tcp()?;
        Some(PacketSignal::new(
            self.timestamp,
            Endpoint::new(self.ip.src, src_port),
            Endpoint::new(self.ip.dst, dst_port),
            flags,
        ))
    }

    /// Returns the IP layer and a reference to its payload.
    fn get_ip_info(data: &[u8], link: LinkLayer) -> Result<(IpLayer, &[u8]), Skipped> {
        match link {
            LinkLayer::Ethernet => {
                let eth = EthernetPacket::new(data).ok_or(Skipped::NotIp)?;
                let mut ethertype = eth.get_ethertype();
                let mut offset = Settings::ETHDR;
                if ethertype == EtherTypes::Vlan {
                    let vlan = VlanPacket::new(&data[offset..]).ok_or(Skipped::NotIp)?;
                    ethertype = vlan.get_ethertype();
                    offset += Settings::VLANHDR;
                }
                Self::parse_by_ethertype(ethertype, &data[offset..])
            }
            LinkLayer::LinuxSll => {
                if data.len() < Settings::SLLHDR {
                    return Err(Skipped::NotIp);
                }
                let ethertype = EtherType(u16::from_be_bytes([data[14], data[15]]));
                Self::parse_by_ethertype(ethertype, &data[Settings::SLLHDR..])
            }
            LinkLayer::Null => {
                let family = data.get(..Settings::NULLHDR).ok_or(Skipped::NotIp)?;
                // Written in the byte order of the capturing host.
                let le = u32::from_le_bytes([family[0], family[1], family[2], family[3]]);
                let be = u32::from_be_bytes([family[0], family[1], family[2], family[3]]);
                let payload = &data[Settings::NULLHDR..];
                if le == AF_INET || be == AF_INET {
                    Self::parse_ipv4_packet(payload)
                } else if AF_INET6.contains(&le) || AF_INET6.contains(&be) {
                    Self::parse_ipv6_packet(payload)
                } else {
                    Err(Skipped::NotIp)
                }
            }
            LinkLayer::RawIp => match data.first().map(|b| b >> 4) {
                Some(4) => Self::parse_ipv4_packet(data),
                Some(6) => Self::parse_ipv6_packet(data),
                _ => Err(Skipped::NotIp),
            },
        }
    }

    fn parse_by_ethertype(ethertype: EtherType, payload: &[u8]) -> Result<(IpLayer, &[u8]), Skipped> {
        match ethertype {
            EtherTypes::Ipv4 => Self::parse_ipv4_packet(payload),
            EtherTypes::Ipv6 => Self::parse_ipv6_packet(payload),
            _ => Err(Skipped::NotIp),
        }
    }

    fn parse_ipv4_packet(payload: &[u8]) -> Result<(IpLayer, &[u8]), Skipped> {
        let ipv4 = Ipv4Packet::new(payload).ok_or(Skipped::NotIp)?;
        if ipv4.get_fragment_offset() != 0 {
            return Err(Skipped::Fragment);
        }
        let hdrlen = ipv4.get_header_length() as usize * WORD_SIZE;
        if hdrlen < Settings::IPV4HDR {
            return Err(Skipped::NotIp);
        }
        let rest = payload.get(hdrlen..).ok_or(Skipped::NotIp)?;
        Ok((
            IpLayer {
                src: IpAddr::V4(ipv4.get_source()),
                dst: IpAddr::V4(ipv4.get_destination()),
                protocol: ipv4.get_next_level_protocol(),
            },
            rest,
        ))
    }

    fn parse_ipv6_packet(payload: &[u8]) -> Result<(IpLayer, &[u8]), Skipped> {
        let ipv6 = Ipv6Packet::new(payload).ok_or(Skipped::NotIp)?;
        Ok((
            IpLayer {
                src: IpAddr::V6(ipv6.get_source()),
                dst: IpAddr::V6(ipv6.get_destination()),
                protocol: ipv6.get_next_header(),
            },
            &payload[Settings::IPV6HDR..],
        ))
    }
}
