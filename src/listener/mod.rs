use std::time::Duration;

pub struct Settings {}

impl Settings {
    pub const PROMISC: bool = true;
    pub const IMMEDIATE_MODE: bool = true;
    // Read timeout in milliseconds, lets the live loops notice a stop request.
    pub const TIMEOUT: i32 = 500;
    pub const PRECISION: pcap::Precision = pcap::Precision::Micro;
    pub const SNAPLEN: i32 = 65536;
    pub const DEFAULT_FILTER: &str = "(tcp and port 80) or port 53 or icmp";
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    pub const MAX_CONSECUTIVE_READ_ERRORS: usize = 16;
    // Teardown is considered complete after this many ACKs following the first FIN.
    pub const FIN_ACK_THRESHOLD: u8 = 2;
    pub const MICROS_PER_SEC: f64 = 1_000_000.0;
    pub const IPV4HDR: usize = 20;
    pub const IPV6HDR: usize = 40;
    pub const ETHDR: usize = 14;
    pub const VLANHDR: usize = 4;
    pub const SLLHDR: usize = 16;
    pub const NULLHDR: usize = 4;
}

pub mod analyzer;
pub mod capture;
pub mod packet;
pub mod parser;
pub mod recorder;
pub mod tracking;
