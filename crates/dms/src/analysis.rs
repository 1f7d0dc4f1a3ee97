//! DMS analysis results

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::Baseline;
use crate::evaluator::{Classification, StateFlags};
use crate::features::FeatureFrame;
use crate::pose::PoseAngles;
use crate::session::WindowStatus;
use crate::DmsError;

/// Complete analysis of one evaluated frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Capture timestamp
    pub timestamp: Duration,

    pub classification: Classification,

    pub flags: StateFlags,

    pub features: FeatureFrame,

    /// Head pose (roll, pitch, yaw)
    pub pose: PoseAngles,

    /// Frozen baseline, or the running median while calibrating
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Baseline>,

    /// Baseline samples are still being collected
    pub calibrating: bool,

    pub window: WindowStatus,
}

impl FrameReport {
    /// Whether this frame pushed the drowsy fraction over the alert level
    pub fn has_alert(&self) -> bool {
        self.window.alert
    }
}

/// What happened to a frame
#[derive(Debug)]
pub enum FrameOutcome {
    Evaluated(FrameReport),
    /// Nothing was evaluated and no state changed
    Skipped(DmsError),
}

impl FrameOutcome {
    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            FrameOutcome::Evaluated(report) => Some(report),
            FrameOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FrameOutcome::Skipped(_))
    }

    pub fn classification(&self) -> Option<Classification> {
        self.report().map(|r| r.classification)
    }
}
