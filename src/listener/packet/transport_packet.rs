use std::fmt::{self, Display};

use log::warn;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

/// Transport header of an IP packet, reduced to what flow tracking reads.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TransportPacket {
    TCP {
        src_port: u16,
        dst_port: u16,
        flags: TcpFlags,
    },
    UDP { src_port: u16, dst_port: u16 },
    /// ICMP or ICMPv6, told apart by the IP protocol number.
    ICMP { protocol: u8 },
    /// Any other protocol, or a TCP/UDP header too short to read.
    OTHER { protocol: u8 },
}

impl TransportPacket {
    pub fn get_ip_proto(&self) -> IpNextHeaderProtocol {
        match self {
            TransportPacket::TCP { .. } => IpNextHeaderProtocols::Tcp,
            TransportPacket::UDP { .. } => IpNextHeaderProtocols::Udp,
            TransportPacket::ICMP { protocol } | TransportPacket::OTHER { protocol } => {
                IpNextHeaderProtocol(*protocol)
            }
        }
    }

    /// Reads the transport header at the start of an IP payload.
    pub fn from_data(payload: &[u8], protocol: IpNextHeaderProtocol) -> Self {
        let parsed = match protocol {
            IpNextHeaderProtocols::Tcp => TcpPacket::new(payload).map(|tcp| TransportPacket::TCP {
                src_port: tcp.get_source(),
                dst_port: tcp.get_destination(),
                flags: TcpFlags::new(tcp.get_flags()),
            }),
            IpNextHeaderProtocols::Udp => UdpPacket::new(payload).map(|udp| TransportPacket::UDP {
                src_port: udp.get_source(),
                dst_port: udp.get_destination(),
            }),
            IpNextHeaderProtocols::Icmp | IpNextHeaderProtocols::Icmpv6 => {
                return TransportPacket::ICMP {
                    protocol: protocol.0,
                }
            }
            _ => None,
        };
        parsed.unwrap_or_else(|| {
            if matches!(protocol, IpNextHeaderProtocols::Tcp | IpNextHeaderProtocols::Udp) {
                warn!("Truncated {} header ({} bytes)", protocol, payload.len());
            }
            TransportPacket::OTHER {
                protocol: protocol.0,
            }
        })
    }
}

/// TCP control flags byte. Only the bits that drive the lifecycle are named.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;

    const NAMES: [(u8, &'static str); 4] = [
        (Self::SYN, "SYN"),
        (Self::ACK, "ACK"),
        (Self::FIN, "FIN"),
        (Self::RST, "RST"),
    ];

    pub fn new(flags: u8) -> TcpFlags {
        TcpFlags(flags)
    }

    fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_syn(&self) -> bool {
        self.has(Self::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.has(Self::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.has(Self::FIN)
    }

    pub fn is_rst(&self) -> bool {
        self.has(Self::RST)
    }

    /// SYN without ACK, i.e. the client's opening segment.
    pub fn is_initial_syn(&self) -> bool {
        self.is_syn() && !self.is_ack()
    }
}

impl Display for TcpFlags {
    /// `SYN|ACK` style, `-` when none of the named bits are set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bit, name) in Self::NAMES {
            if self.has(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}
