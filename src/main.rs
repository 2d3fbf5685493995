use anyhow::{bail, Context, Result};
use clap::Parser as _;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tcp_flow_timer::config::{load_config, AnalyzeArgs, AppConfig, ReportFormat};
use tcp_flow_timer::listener::capture::{CaptureFile, PacketCapturer};
use tcp_flow_timer::listener::parser::Parser;
use tcp_flow_timer::logging::logger;
use tcp_flow_timer::report::Report;
use tcp_flow_timer::Settings;
use tokio::sync::mpsc::unbounded_channel;
use tokio::task;

async fn analyze_file(path: &Path, config: &AppConfig) -> Result<Report> {
    let file = CaptureFile::open(path, config.analysis.filter.as_deref())?;
    let parser = Parser::new(file.link(), &config.analysis);
    task::spawn_blocking(move || parser.run_offline(file)).await?
}

async fn analyze_live(iface: &str, config: &AppConfig) -> Result<Report> {
    let capturer = PacketCapturer::new(
        Some(iface),
        config.analysis.filter.as_deref(),
        Settings::SNAPLEN,
        Settings::PROMISC,
    )?;
    let parser = Parser::new(capturer.link(), &config.analysis);

    let (sender, receiver) = unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let capture_h = capturer.start_capture_loop(sender, stop.clone());

    info!("Analysing {} until Ctrl-C", iface);
    let report = parser.start(receiver).await;

    stop.store(true, Ordering::Relaxed);
    capture_h.await?;
    Ok(report)
}

fn write_report(report: &Report, format: ReportFormat, output: Option<&Path>) -> Result<()> {
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    match format {
        ReportFormat::Text => {
            report.write_text(&mut out)?;
        }
        ReportFormat::Json => report.write_json(&mut out)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AnalyzeArgs::parse();
    let mut config = load_config(&args.config)?;
    config.apply_analyze_args(&args);
    logger::setup_logging(config.logging.level, config.logging.file.as_deref())?;

    let mut report = match (&args.input, &args.iface) {
        (Some(path), _) => analyze_file(path, &config).await?,
        (None, Some(iface)) => analyze_live(iface, &config).await?,
        (None, None) => bail!("Either a capture file or --iface is required"),
    };

    if let Some(n) = config.analysis.top {
        report.truncate(n);
    }
    write_report(&report, config.analysis.format, args.output.as_deref())
}
