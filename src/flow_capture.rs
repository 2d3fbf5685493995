use anyhow::Result;
use clap::Parser as _;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tcp_flow_timer::config::{load_config, CaptureArgs};
use tcp_flow_timer::listener::capture::PacketCapturer;
use tcp_flow_timer::listener::recorder::Recorder;
use tcp_flow_timer::logging::logger;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CaptureArgs::parse();
    let mut config = load_config(&args.config)?;
    config.apply_capture_args(&args);
    logger::setup_logging(config.logging.level, config.logging.file.as_deref())?;

    let capture = &config.capture;
    let filter = Some(capture.filter.as_str()).filter(|f| !f.is_empty());
    let capturer = PacketCapturer::new(capture.iface.as_deref(), filter, capture.snaplen, capture.promisc)?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut record_h = Recorder::new(capturer, capture).start(stop.clone());

    let summary = tokio::select! {
        res = &mut record_h => res??,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C");
            stop.store(true, Ordering::Relaxed);
            record_h.await??
        }
    };

    info!(
        "Wrote {} packets to {} in {:.1}s ({:?})",
        summary.packets,
        capture.output.display(),
        summary.elapsed.as_secs_f64(),
        summary.reason
    );
    Ok(())
}
