//! DMS configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// Thresholds and timing policy for driver state evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// MAR above which a yawn starts
    pub mar_thresh: f64,

    /// MAR below which a yawn ends
    pub mar_thresh2: f64,

    /// Head pose deviation from baseline (degrees)
    pub head_thresh: f64,

    /// EAR below which the eyes count as closed
    pub ear_thresh: f64,

    /// Consecutive closed-eye frames before the closure is sustained
    pub blink_thresh: u32,

    /// Gaze deviation from baseline (degrees)
    pub gaze_thresh: f64,

    /// Overrides the frame rate reported by the frame source
    pub captured_fps: Option<f64>,

    /// Fraction of the reset interval spent drowsy that raises an alert
    pub alert_fraction: f64,

    /// Drowsiness window reset cadence (seconds)
    pub reset_interval_secs: f64,

    /// Fraction of the session spent drowsy for a fatigued verdict
    pub fatigue_fraction: f64,

    /// Valid frames collected for the neutral-pose baseline
    pub calibration_frames: usize,

    /// EMA weight of the newest EAR/MAR/gaze sample (1.0 disables smoothing)
    pub smoothing_alpha: f64,

    /// RMS reprojection error above which a pose solve is rejected (pixels)
    pub max_reprojection_error_px: f64,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            mar_thresh: 0.7,
            mar_thresh2: 0.15,
            head_thresh: 6.0,
            ear_thresh: 0.28,
            blink_thresh: 10,
            gaze_thresh: 5.0,
            captured_fps: None,
            alert_fraction: 0.08,
            reset_interval_secs: 60.0,
            fatigue_fraction: 0.10,
            calibration_frames: 30,
            smoothing_alpha: 1.0,
            max_reprojection_error_px: 25.0,
        }
    }
}

impl DmsConfig {
    /// Create strict config (lower thresholds)
    pub fn strict() -> Self {
        Self {
            head_thresh: 4.0,
            ear_thresh: 0.30,
            blink_thresh: 6,
            gaze_thresh: 3.0,
            alert_fraction: 0.05,
            ..Default::default()
        }
    }

    /// Create lenient config (higher thresholds)
    pub fn lenient() -> Self {
        Self {
            head_thresh: 10.0,
            ear_thresh: 0.22,
            blink_thresh: 15,
            gaze_thresh: 8.0,
            alert_fraction: 0.12,
            ..Default::default()
        }
    }

    /// Reject configurations the evaluator cannot run with
    pub fn validate(&self) -> Result<(), DmsError> {
        let invalid = |msg: String| Err(DmsError::InvalidConfiguration(msg));

        for (name, value) in [
            ("mar_thresh", self.mar_thresh),
            ("mar_thresh2", self.mar_thresh2),
            ("head_thresh", self.head_thresh),
            ("ear_thresh", self.ear_thresh),
            ("gaze_thresh", self.gaze_thresh),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        if self.mar_thresh2 > self.mar_thresh {
            return invalid(format!(
                "mar_thresh2 ({}) must not exceed mar_thresh ({})",
                self.mar_thresh2, self.mar_thresh
            ));
        }
        if self.blink_thresh == 0 {
            return invalid("blink_thresh must be at least 1".to_string());
        }
        if let Some(fps) = self.captured_fps {
            if !fps.is_finite() || fps <= 0.0 {
                return invalid(format!("captured_fps must be positive, got {fps}"));
            }
        }
        if !(self.alert_fraction > 0.0 && self.alert_fraction <= 1.0) {
            return invalid(format!("alert_fraction must be in (0, 1], got {}", self.alert_fraction));
        }
        if !(self.fatigue_fraction > 0.0 && self.fatigue_fraction <= 1.0) {
            return invalid(format!("fatigue_fraction must be in (0, 1], got {}", self.fatigue_fraction));
        }
        if !self.reset_interval_secs.is_finite() || self.reset_interval_secs <= 0.0 {
            return invalid(format!("reset_interval_secs must be positive, got {}", self.reset_interval_secs));
        }
        if Duration::try_from_secs_f64(self.reset_interval_secs).is_err() {
            return invalid(format!("reset_interval_secs out of range, got {}", self.reset_interval_secs));
        }
        if self.calibration_frames == 0 {
            return invalid("calibration_frames must be at least 1".to_string());
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return invalid(format!("smoothing_alpha must be in (0, 1], got {}", self.smoothing_alpha));
        }
        if !self.max_reprojection_error_px.is_finite() || self.max_reprojection_error_px <= 0.0 {
            return invalid(format!(
                "max_reprojection_error_px must be positive, got {}",
                self.max_reprojection_error_px
            ));
        }
        Ok(())
    }

    /// Frame rate to use for a session: the override if set, else the source's
    pub fn resolve_fps(&self, source_fps: Option<f64>) -> Result<f64, DmsError> {
        match self.captured_fps.or(source_fps) {
            Some(fps) if fps.is_finite() && fps > 0.0 => Ok(fps),
            Some(fps) => Err(DmsError::InvalidConfiguration(format!(
                "capture frame rate must be positive, got {fps}"
            ))),
            None => Err(DmsError::InvalidConfiguration(
                "capture frame rate unknown; set captured_fps".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DmsConfig::default().validate().is_ok());
        assert!(DmsConfig::strict().validate().is_ok());
        assert!(DmsConfig::lenient().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_fps() {
        let config = DmsConfig {
            captured_fps: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DmsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_inverted_mar_thresholds() {
        let config = DmsConfig {
            mar_thresh: 0.1,
            mar_thresh2: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let config = DmsConfig {
            head_thresh: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_blink_thresh() {
        let config = DmsConfig {
            blink_thresh: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DmsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_unrepresentable_reset_interval() {
        let config = DmsConfig {
            reset_interval_secs: 1e20,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DmsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_resolve_fps_prefers_override() {
        let config = DmsConfig {
            captured_fps: Some(25.0),
            ..Default::default()
        };
        assert_eq!(config.resolve_fps(Some(30.0)).unwrap(), 25.0);
        assert_eq!(DmsConfig::default().resolve_fps(Some(30.0)).unwrap(), 30.0);
        assert!(DmsConfig::default().resolve_fps(None).is_err());
        assert!(DmsConfig::default().resolve_fps(Some(-5.0)).is_err());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: DmsConfig = serde_json::from_str(r#"{"ear_thresh": 0.25}"#).unwrap();
        assert_eq!(config.ear_thresh, 0.25);
        assert_eq!(config.blink_thresh, 10);
    }
}
