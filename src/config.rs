use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Settings;

#[derive(Deserialize, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub analysis: Analysis,
    #[serde(default)]
    pub capture: Capture,
    #[serde(default)]
    pub logging: Logging,
}

/// What happens to flows that never close.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IncompletePolicy {
    /// Discard them, only their count is logged.
    Drop,
    /// List them separately in the report.
    Report,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Deserialize, Debug)]
pub struct Analysis {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default, deserialize_with = "optional_duration_deserialize")]
    pub idle_timeout: Option<Duration>,
    #[serde(
        default = "default_sweep_interval",
        deserialize_with = "duration_deserialize"
    )]
    pub sweep_interval: Duration,
    #[serde(default = "default_incomplete")]
    pub incomplete: IncompletePolicy,
    #[serde(default = "default_format")]
    pub format: ReportFormat,
    #[serde(default)]
    pub top: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Capture {
    pub iface: Option<String>,
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
    #[serde(default = "default_promisc")]
    pub promisc: bool,
    #[serde(default, deserialize_with = "optional_duration_deserialize")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub max_packets: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Logging {
    #[serde(default = "default_level", deserialize_with = "level_deserialize")]
    pub level: LevelFilter,
    pub file: Option<PathBuf>,
}

fn default_sweep_interval() -> Duration {
    Settings::SWEEP_INTERVAL
}
fn default_incomplete() -> IncompletePolicy {
    IncompletePolicy::Drop
}
fn default_format() -> ReportFormat {
    ReportFormat::Text
}
fn default_filter() -> String {
    String::from(Settings::DEFAULT_FILTER)
}
fn default_output() -> PathBuf {
    PathBuf::from("captured.pcap")
}
fn default_snaplen() -> i32 {
    Settings::SNAPLEN
}
fn default_promisc() -> bool {
    Settings::PROMISC
}
fn default_level() -> LevelFilter {
    LevelFilter::Info
}

fn duration_deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(s))
}

fn optional_duration_deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<u64>::deserialize(deserializer)?;
    Ok(s.map(Duration::from_secs))
}

fn level_deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse()
        .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {}", s)))
}

impl Default for Analysis {
    fn default() -> Self {
        Analysis {
            filter: None,
            idle_timeout: None,
            sweep_interval: default_sweep_interval(),
            incomplete: default_incomplete(),
            format: default_format(),
            top: None,
        }
    }
}

impl Default for Capture {
    fn default() -> Self {
        Capture {
            iface: None,
            filter: default_filter(),
            output: default_output(),
            snaplen: default_snaplen(),
            promisc: default_promisc(),
            duration: None,
            max_packets: None,
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: default_level(),
            file: None,
        }
    }
}

/// Ranks the TCP connections of a capture by lifetime.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct AnalyzeArgs {
    /// Capture file to analyse.
    #[arg(required_unless_present = "iface", conflicts_with = "iface")]
    pub input: Option<PathBuf>,

    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Analyse a live interface until Ctrl-C instead of a file.
    #[arg(short, long)]
    pub iface: Option<String>,

    /// BPF expression applied before analysis.
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Evict flows idle for this many seconds of capture time.
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    #[arg(long, value_enum)]
    pub incomplete: Option<IncompletePolicy>,

    #[arg(long, value_enum)]
    pub format: Option<ReportFormat>,

    /// Only print the N shortest flows.
    #[arg(long)]
    pub top: Option<usize>,

    /// Write the report here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,
}

/// Records filtered live traffic into a pcap file.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CaptureArgs {
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    #[arg(short, long)]
    pub iface: Option<String>,

    #[arg(short, long)]
    pub filter: Option<String>,

    #[arg(short = 'w', long)]
    pub output: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Stop after this many packets.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    #[arg(short, long)]
    pub snaplen: Option<i32>,

    #[arg(long, value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse().map_err(|_| format!("invalid log level '{}'", s))
}

/// Reads the config file if it exists, defaults otherwise.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    Ok(toml::from_str(contents)?)
}

impl AppConfig {
    pub fn apply_analyze_args(&mut self, args: &AnalyzeArgs) {
        if let Some(filter) = &args.filter {
            self.analysis.filter = Some(filter.clone());
        }
        if let Some(secs) = args.idle_timeout {
            self.analysis.idle_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(policy) = args.incomplete {
            self.analysis.incomplete = policy;
        }
        if let Some(format) = args.format {
            self.analysis.format = format;
        }
        if args.top.is_some() {
            self.analysis.top = args.top;
        }
        if let Some(level) = args.log_level {
            self.logging.level = level;
        }
    }

    pub fn apply_capture_args(&mut self, args: &CaptureArgs) {
        if let Some(iface) = &args.iface {
            self.capture.iface = Some(iface.clone());
        }
        if let Some(filter) = &args.filter {
            self.capture.filter = filter.clone();
        }
        if let Some(output) = &args.output {
            self.capture.output = output.clone();
        }
        if let Some(secs) = args.duration {
            self.capture.duration = Some(Duration::from_secs(secs));
        }
        if args.count.is_some() {
            self.capture.max_packets = args.count;
        }
        if let Some(snaplen) = args.snaplen {
            self.capture.snaplen = snaplen;
        }
        if let Some(level) = args.log_level {
            self.logging.level = level;
        }
    }
}
