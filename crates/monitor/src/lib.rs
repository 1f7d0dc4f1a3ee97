//! Driver drowsiness monitor
//!
//! Wires a frame source, a landmark provider and an alert sink to the DMS
//! pipeline, and provides the configuration and logging setup of the
//! `driver-monitor` binary.

pub mod frame_loop;
pub mod replay;
pub mod settings;

pub use frame_loop::FrameLoop;
pub use replay::{ReplayError, ReplayFrames, ReplayLandmarks, ReplayTrace, TraceRecord};
pub use settings::{LogSettings, Settings};

use alerting::AlertError;
use camera_capture::CameraError;
use dms::{DmsError, SessionSummary};
use thiserror::Error;
use tracing::info;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("DMS error: {0}")]
    Dms(#[from] DmsError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Initialize logging. `RUST_LOG` takes precedence over the configured filter.
pub fn init_logging(settings: &LogSettings) -> Result<(), SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Log the end-of-session summary
pub fn log_summary(summary: &SessionSummary) {
    info!("=== Session summary ===");
    info!("Session duration: {:.2} minutes", summary.session_minutes);
    info!(
        "Total drowsy time: {:.2} minutes ({} of {} evaluated frames)",
        summary.total_drowsy_minutes, summary.drowsy_frames, summary.evaluated_frames
    );
    info!("Fatigue threshold: {:.2} minutes", summary.fatigue_threshold_minutes);
    info!("Result: {}", summary.verdict);
}
