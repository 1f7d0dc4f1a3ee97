//! Per-frame driver state classification

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::Baseline;
use crate::features::FeatureFrame;
use crate::pose::{angle_delta, PoseAngles};
use crate::DmsConfig;

/// Driver state for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Alert,
    Drowsy,
    Distracted,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Alert => "Alert",
            Classification::Drowsy => "Drowsy",
            Classification::Distracted => "Distracted",
        };
        f.write_str(name)
    }
}

/// Signals raised by the threshold rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags {
    /// EAR below threshold for at least `blink_thresh` consecutive frames
    pub eyes_closed: bool,
    pub yawning: bool,
    /// Roll, pitch or yaw away from the baseline
    pub head_deviation: bool,
    pub gaze_deviation: bool,
}

impl StateFlags {
    /// Fixed precedence, first match wins:
    /// 1. sustained eye closure => Drowsy
    /// 2. yawning with head deviation => Drowsy
    /// 3. head or gaze deviation => Distracted
    /// 4. otherwise Alert
    pub fn classify(&self) -> Classification {
        if self.eyes_closed || (self.yawning && self.head_deviation) {
            Classification::Drowsy
        } else if self.head_deviation || self.gaze_deviation {
            Classification::Distracted
        } else {
            Classification::Alert
        }
    }
}

/// Result of evaluating one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub classification: Classification,
    pub flags: StateFlags,
    /// Consecutive frames with EAR below threshold, this frame included
    pub closed_frames: u32,
}

/// Applies the threshold rules; remembers only the closed-eye run length
/// and the last classification.
#[derive(Debug, Clone)]
pub struct DriverStateEvaluator {
    ear_thresh: f64,
    blink_thresh: u32,
    head_thresh: f64,
    gaze_thresh: f64,
    closed_frames: u32,
    last: Option<Classification>,
}

impl DriverStateEvaluator {
    pub fn new(config: &DmsConfig) -> Self {
        Self {
            ear_thresh: config.ear_thresh,
            blink_thresh: config.blink_thresh,
            head_thresh: config.head_thresh,
            gaze_thresh: config.gaze_thresh,
            closed_frames: 0,
            last: None,
        }
    }

    /// Classify a frame. Without a baseline no deviation can be measured, so
    /// only eye closure can make the frame anything but Alert.
    pub fn evaluate(
        &mut self,
        features: &FeatureFrame,
        pose: &PoseAngles,
        baseline: Option<&Baseline>,
    ) -> Evaluation {
        if features.ear < self.ear_thresh {
            self.closed_frames = self.closed_frames.saturating_add(1);
        } else {
            self.closed_frames = 0;
        }

        let (head_deviation, gaze_deviation) = match baseline {
            Some(base) => (
                [
                    angle_delta(pose.roll, base.roll),
                    angle_delta(pose.pitch, base.pitch),
                    angle_delta(pose.yaw, base.yaw),
                ]
                .iter()
                .any(|d| d.abs() > self.head_thresh),
                (features.gaze - base.gaze).abs() > self.gaze_thresh,
            ),
            None => (false, false),
        };

        let flags = StateFlags {
            eyes_closed: self.closed_frames >= self.blink_thresh,
            yawning: features.yawning,
            head_deviation,
            gaze_deviation,
        };
        let classification = flags.classify();
        self.last = Some(classification);

        Evaluation {
            classification,
            flags,
            closed_frames: self.closed_frames,
        }
    }

    /// Classification of the most recent evaluated frame
    pub fn last_classification(&self) -> Option<Classification> {
        self.last
    }

    pub fn closed_frames(&self) -> u32 {
        self.closed_frames
    }

    pub fn reset(&mut self) {
        self.closed_frames = 0;
        self.last = None;
    }
}
