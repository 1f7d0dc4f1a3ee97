//! Driver Monitor - Main Entry Point
//!
//! Usage: `driver-monitor [CONFIG]`. Replays the configured landmark trace
//! through the DMS pipeline until the trace ends or Ctrl-C is pressed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alerting::TracingAlertSink;
use anyhow::Context;
use monitor::{init_logging, log_summary, FrameLoop, ReplayTrace, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref()).context("failed to load settings")?;
    init_logging(&settings.logging)?;

    info!("=== Driver Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    settings.validate()?;

    let trace_path = settings
        .trace_path
        .clone()
        .context("no landmark trace configured; set trace_path or DMS__TRACE_PATH")?;
    let trace = ReplayTrace::from_file(&trace_path)
        .with_context(|| format!("failed to load trace {}", trace_path.display()))?;
    let intrinsics = settings.intrinsics(trace.frame_size())?;
    let (frames, landmarks) = trace.into_parts();

    let mut frame_loop = FrameLoop::new(
        frames,
        landmarks,
        TracingAlertSink,
        intrinsics,
        settings.thresholds.clone(),
        settings.alerts.clone(),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            ctrl_c_stop.store(true, Ordering::Relaxed);
        }
    });

    let summary = tokio::task::spawn_blocking(move || frame_loop.run(&stop)).await??;
    log_summary(&summary);

    Ok(())
}
