mod packet_builder;
mod signal;
mod transport_packet;

pub use packet_builder::timeval_to_micros;
pub use packet_builder::IpLayer;
pub use packet_builder::LinkLayer;
pub use packet_builder::ParsedPacket;
pub use packet_builder::Skipped;
pub use signal::Endpoint;
pub use signal::PacketSignal;
pub use transport_packet::TcpFlags;
pub use transport_packet::TransportPacket;

#[cfg(test)]
pub(crate) use packet_builder::tests as frames;
