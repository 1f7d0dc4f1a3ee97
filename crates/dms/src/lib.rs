//! Driver Monitoring System (DMS)
//!
//! Per-frame driver state analysis from facial landmarks:
//! - Head pose estimation (PnP against a generic face model)
//! - Eye aspect ratio, mouth aspect ratio and gaze
//! - Neutral-pose baseline calibration
//! - Alert / Drowsy / Distracted classification
//! - Windowed drowsiness accumulation and end-of-session verdict

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod evaluator;
pub mod features;
pub mod landmarks;
pub mod pose;
pub mod session;
pub mod synthetic;

pub use analysis::{FrameOutcome, FrameReport};
pub use calibration::{Baseline, BaselineCalibrator, SortedWindow};
pub use config::DmsConfig;
pub use evaluator::{Classification, DriverStateEvaluator, Evaluation, StateFlags};
pub use features::{FeatureExtractor, FeatureFrame};
pub use landmarks::{Landmark, LandmarkProvider, LandmarkSet};
pub use pose::{PoseAngles, PoseEstimator};
pub use session::{DriverStateSession, SessionSummary, Verdict, WindowStatus};

use std::time::Duration;

use camera_capture::CameraIntrinsics;
use thiserror::Error;
use tracing::{debug, info};

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Pose estimation failed: {0}")]
    PoseSolve(String),

    #[error("Landmark {0} missing from landmark set")]
    MissingLandmark(usize),

    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid camera intrinsics: {0}")]
    Intrinsics(String),

    #[error("Landmark detection failed: {0}")]
    Detection(String),
}

impl DmsError {
    /// Errors that only affect the current frame
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            DmsError::NoFaceDetected | DmsError::PoseSolve(_) | DmsError::MissingLandmark(_)
        )
    }
}

/// Driver monitoring module
pub struct DmsModule {
    pose_estimator: PoseEstimator,
    extractor: FeatureExtractor,
    calibrator: BaselineCalibrator,
    evaluator: DriverStateEvaluator,
    session: DriverStateSession,
}

impl DmsModule {
    /// Create a new DMS module for a stream captured at `captured_fps`
    pub fn new(
        config: DmsConfig,
        intrinsics: CameraIntrinsics,
        captured_fps: f64,
    ) -> Result<Self, DmsError> {
        config.validate()?;
        let module = Self {
            pose_estimator: PoseEstimator::new(intrinsics, &config)?,
            extractor: FeatureExtractor::new(&config),
            calibrator: BaselineCalibrator::new(config.calibration_frames),
            evaluator: DriverStateEvaluator::new(&config),
            session: DriverStateSession::new(captured_fps, &config)?,
        };
        info!(
            "DMS initialized at {:.1} fps, calibrating over {} frames",
            captured_fps, config.calibration_frames
        );
        Ok(module)
    }

    /// Analyze the landmarks of one frame captured at `timestamp`.
    ///
    /// A frame without a face, with an incomplete landmark set, or whose pose
    /// cannot be solved is skipped: the calibrator, evaluator and drowsiness
    /// window are left exactly as they were.
    pub fn process(&mut self, timestamp: Duration, landmarks: Option<&LandmarkSet>) -> FrameOutcome {
        self.session.observe(timestamp);

        let Some(landmarks) = landmarks else {
            return FrameOutcome::Skipped(DmsError::NoFaceDetected);
        };

        let pose = match self.pose_estimator.estimate(landmarks) {
            Ok(pose) => pose,
            Err(e) => {
                debug!("Skipping frame at {:?}: {}", timestamp, e);
                return FrameOutcome::Skipped(e);
            }
        };
        let features = match self.extractor.extract(landmarks) {
            Ok(features) => features,
            Err(e) => {
                debug!("Skipping frame at {:?}: {}", timestamp, e);
                return FrameOutcome::Skipped(e);
            }
        };

        let calibrating = self.calibrator.is_calibrating();
        if calibrating {
            self.calibrator.update(&pose, features.gaze);
        }
        let baseline = self.calibrator.baseline();
        let evaluation = self.evaluator.evaluate(&features, &pose, baseline.as_ref());
        let window = self.session.record(timestamp, evaluation.classification);

        let report = FrameReport {
            timestamp,
            classification: evaluation.classification,
            flags: evaluation.flags,
            features,
            pose,
            baseline: baseline.or_else(|| self.calibrator.running_median()),
            calibrating,
            window,
        };
        debug!(
            "{:?} {} ear={:.3} mar={:.3} gaze={:.2} roll={:.2} pitch={:.2} yaw={:.2} drowsy={:.2}s",
            timestamp,
            report.classification,
            features.ear,
            features.mar,
            features.gaze,
            pose.roll,
            pose.pitch,
            pose.yaw,
            window.drowsiness_time_secs
        );
        FrameOutcome::Evaluated(report)
    }

    /// Skip a frame captured at `timestamp` whose landmarks could not be
    /// obtained. The session clock still advances, as for a frame without a
    /// face.
    pub fn skip(&mut self, timestamp: Duration, reason: DmsError) -> FrameOutcome {
        self.session.observe(timestamp);
        FrameOutcome::Skipped(reason)
    }

    /// Discard the baseline and collect a new one from the coming frames
    pub fn recalibrate(&mut self) {
        self.calibrator.recalibrate();
        self.evaluator.reset();
        self.extractor.reset();
    }

    /// Frozen baseline, if calibration has completed
    pub fn baseline(&self) -> Option<Baseline> {
        self.calibrator.baseline()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrator.is_calibrating()
    }

    pub fn last_classification(&self) -> Option<Classification> {
        self.evaluator.last_classification()
    }

    pub fn session(&self) -> &DriverStateSession {
        &self.session
    }

    /// Session totals and the fatigue verdict
    pub fn summary(&self) -> SessionSummary {
        self.session.summary()
    }

    /// Reset driver state (on driver change)
    pub fn reset_state(&mut self) {
        self.recalibrate();
        self.session.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{FaceParams, SyntheticFace};

    const FPS: f64 = 30.0;

    fn module(config: DmsConfig) -> (DmsModule, SyntheticFace) {
        let synth = SyntheticFace::default();
        let module = DmsModule::new(config, synth.intrinsics.clone(), FPS).unwrap();
        (module, synth)
    }

    fn at(frame: u64) -> Duration {
        Duration::from_secs_f64(frame as f64 / FPS)
    }

    fn calibrate(module: &mut DmsModule, synth: &SyntheticFace, frames: u64) {
        let neutral = synth.landmarks(&FaceParams::default());
        for i in 0..frames {
            module.process(at(i), Some(&neutral));
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DmsConfig {
            ear_thresh: f64::NAN,
            ..Default::default()
        };
        let result = DmsModule::new(config, SyntheticFace::default().intrinsics, FPS);
        assert!(matches!(result, Err(DmsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_calibrates_then_detects_distraction() {
        let (mut module, synth) = module(DmsConfig::default());
        calibrate(&mut module, &synth, 30);
        let baseline = module.baseline().unwrap();
        assert!(baseline.yaw.abs() < 0.1);

        let turned = synth.landmarks(&FaceParams {
            pose: PoseAngles::new(0.0, 0.0, 25.0),
            ..Default::default()
        });
        let outcome = module.process(at(30), Some(&turned));
        assert_eq!(outcome.classification(), Some(Classification::Distracted));
        assert!(outcome.report().unwrap().flags.head_deviation);
    }

    #[test]
    fn test_turned_head_during_calibration_is_alert() {
        let (mut module, synth) = module(DmsConfig::default());
        let turned = synth.landmarks(&FaceParams {
            pose: PoseAngles::new(0.0, 0.0, 25.0),
            ..Default::default()
        });
        let report = module.process(at(0), Some(&turned));
        let report = report.report().unwrap();
        assert!(report.calibrating);
        assert_eq!(report.classification, Classification::Alert);
    }

    #[test]
    fn test_closed_eyes_become_drowsy() {
        let (mut module, synth) = module(DmsConfig::default());
        calibrate(&mut module, &synth, 30);

        let closed = synth.landmarks(&FaceParams {
            eye_open: 0.2,
            ..Default::default()
        });
        let states: Vec<_> = (30..45)
            .map(|i| module.process(at(i), Some(&closed)).classification())
            .collect();
        // Ten consecutive closed frames before the closure counts
        assert!(states[..9].iter().all(|s| *s == Some(Classification::Alert)));
        assert!(states[9..].iter().all(|s| *s == Some(Classification::Drowsy)));
        assert_eq!(module.session().drowsiness_counter(), 6);
    }

    #[test]
    fn test_missing_face_is_a_no_op() {
        let (mut module, synth) = module(DmsConfig {
            blink_thresh: 1,
            ..Default::default()
        });
        let closed = synth.landmarks(&FaceParams {
            eye_open: 0.0,
            ..Default::default()
        });
        module.process(at(0), Some(&closed));
        assert_eq!(module.session().drowsiness_counter(), 1);

        let outcome = module.process(at(1), None);
        assert!(matches!(outcome, FrameOutcome::Skipped(DmsError::NoFaceDetected)));
        assert_eq!(module.session().drowsiness_counter(), 1);
        assert_eq!(module.last_classification(), Some(Classification::Drowsy));
        assert_eq!(module.summary().evaluated_frames, 1);
    }

    #[test]
    fn test_detection_failure_advances_session_clock() {
        let (mut module, synth) = module(DmsConfig::default());
        let face = synth.landmarks(&FaceParams::default());
        module.process(at(0), Some(&face));

        let outcome = module.skip(at(30), DmsError::Detection("timeout".into()));
        assert!(matches!(outcome, FrameOutcome::Skipped(DmsError::Detection(_))));
        let summary = module.summary();
        assert_eq!(summary.evaluated_frames, 1);
        assert!((summary.session_minutes - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_blink_thresh_is_rejected() {
        let config = DmsConfig {
            blink_thresh: 0,
            ..Default::default()
        };
        let result = DmsModule::new(config, SyntheticFace::default().intrinsics, FPS);
        assert!(matches!(result, Err(DmsError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_incomplete_landmarks_are_skipped() {
        let (mut module, _) = module(DmsConfig::default());
        let partial = LandmarkSet::from_pixels(vec![Landmark::default(); 100]);
        let outcome = module.process(at(0), Some(&partial));
        assert!(matches!(outcome, FrameOutcome::Skipped(DmsError::MissingLandmark(_))));
        assert_eq!(module.summary().evaluated_frames, 0);
    }

    #[test]
    fn test_missing_iris_leaves_calibration_untouched() {
        let (mut module, synth) = module(DmsConfig::default());
        let face = synth.landmarks(&FaceParams::default());
        // Mesh without the refined iris points
        let mesh = LandmarkSet::from_pixels(face.points()[..landmarks::index::MESH_POINTS].to_vec());
        let outcome = module.process(at(0), Some(&mesh));
        assert!(outcome.is_skipped());
        assert!(module.is_calibrating());
        assert_eq!(module.calibrator.samples(), 0);
    }

    #[test]
    fn test_recalibrate() {
        let (mut module, synth) = module(DmsConfig {
            calibration_frames: 5,
            ..Default::default()
        });
        calibrate(&mut module, &synth, 5);
        assert!(!module.is_calibrating());

        module.recalibrate();
        assert!(module.is_calibrating());
        assert!(module.baseline().is_none());
    }

    #[test]
    fn test_fatigued_session() {
        let (mut module, synth) = module(DmsConfig {
            blink_thresh: 1,
            ..Default::default()
        });
        let closed = synth.landmarks(&FaceParams {
            eye_open: 0.0,
            ..Default::default()
        });
        let mut alerted = false;
        for i in 0..=300 {
            if let FrameOutcome::Evaluated(report) = module.process(at(i), Some(&closed)) {
                alerted |= report.has_alert();
            }
        }
        assert!(alerted);
        let summary = module.summary();
        assert_eq!(summary.verdict, Verdict::Fatigued);
        assert!((summary.session_minutes - 10.0 / 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_local_errors() {
        assert!(DmsError::NoFaceDetected.is_frame_local());
        assert!(DmsError::PoseSolve("x".into()).is_frame_local());
        assert!(!DmsError::Intrinsics("x".into()).is_frame_local());
    }
}
