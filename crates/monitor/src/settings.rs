//! Monitor configuration
//!
//! Loaded from an optional TOML file and `DMS__*` environment variables, e.g.
//! `DMS__THRESHOLDS__EAR_THRESH=0.25` or `DMS__LOGGING__JSON=true`.

use std::path::{Path, PathBuf};

use alerting::AlertConfig;
use camera_capture::CameraIntrinsics;
use config::{Config, Environment, File};
use dms::DmsConfig;
use serde::{Deserialize, Serialize};

use crate::MonitorError;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "driver-monitor";

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

/// Camera geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// OpenCV-style calibration JSON; approximate intrinsics are used without it
    pub intrinsics_path: Option<PathBuf>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            intrinsics_path: None,
            frame_width: 640,
            frame_height: 480,
        }
    }
}

/// Everything the monitor binary needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Recorded landmark trace to replay
    pub trace_path: Option<PathBuf>,
    pub camera: CameraSettings,
    pub thresholds: DmsConfig,
    pub alerts: AlertConfig,
    pub logging: LogSettings,
}

impl Settings {
    /// Load settings from `path` (required if given, otherwise an optional
    /// `driver-monitor.{toml,json,...}` in the working directory), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, MonitorError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("DMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Reject configurations before any frame is read
    pub fn validate(&self) -> Result<(), MonitorError> {
        self.thresholds.validate()?;
        self.alerts.validate()?;
        if self.camera.frame_width == 0 || self.camera.frame_height == 0 {
            return Err(MonitorError::Settings(config::ConfigError::Message(
                "camera frame size must be non-zero".to_string(),
            )));
        }
        Ok(())
    }

    /// Calibrated intrinsics if configured, else an approximation for the
    /// given (or configured) frame size
    pub fn intrinsics(&self, frame_size: Option<(u32, u32)>) -> Result<CameraIntrinsics, MonitorError> {
        match &self.camera.intrinsics_path {
            Some(path) => Ok(CameraIntrinsics::from_json_file(path)?),
            None => {
                let (width, height) =
                    frame_size.unwrap_or((self.camera.frame_width, self.camera.frame_height));
                Ok(CameraIntrinsics::approximate(width, height))
            }
        }
    }
}
