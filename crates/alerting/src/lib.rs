//! Alerting System
//!
//! Delivers drowsiness alerts raised by the frame loop to a sink, with
//! optional suppression of repeats inside a cooldown window.

mod manager;
mod sink;

pub use manager::{AlertConfig, AlertManager};
pub use sink::{AlertSink, ChannelAlertSink, TracingAlertSink};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AlertError {
    #[error("Alert channel full, alert dropped")]
    ChannelFull,

    #[error("Alert channel closed")]
    ChannelClosed,

    #[error("Invalid alert configuration: {0}")]
    InvalidConfiguration(String),
}

/// Driver has been drowsy for too large a share of the current window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrowsinessAlert {
    /// Capture timestamp of the frame that raised the alert
    pub timestamp: Duration,
    /// Share of the window spent drowsy
    pub drowsy_fraction: f64,
    /// Drowsy time accumulated in the window (seconds)
    pub drowsiness_time_secs: f64,
}
