//! Frame loop driver
//!
//! Pulls frames from a source, asks the landmark provider for the face, runs
//! the DMS pipeline and forwards window alerts to the sink. One frame is in
//! flight at a time; all per-session state lives in the loop.

use std::sync::atomic::{AtomicBool, Ordering};

use alerting::{AlertConfig, AlertManager, AlertSink, DrowsinessAlert};
use camera_capture::{CameraIntrinsics, FrameSource};
use dms::{DmsConfig, DmsModule, FrameOutcome, LandmarkProvider, SessionSummary};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::MonitorError;

/// Drives one camera stream through the DMS pipeline
pub struct FrameLoop<S, P, A> {
    source: S,
    provider: P,
    sink: A,
    module: DmsModule,
    alerts: AlertManager,
    frames: u64,
}

impl<S, P, A> FrameLoop<S, P, A>
where
    S: FrameSource,
    P: LandmarkProvider,
    A: AlertSink,
{
    /// Create a new frame loop. The capture frame rate comes from the config
    /// override or, failing that, from the source.
    pub fn new(
        source: S,
        provider: P,
        sink: A,
        intrinsics: CameraIntrinsics,
        config: DmsConfig,
        alert_config: AlertConfig,
    ) -> Result<Self, MonitorError> {
        let fps = config.resolve_fps(source.fps())?;
        alert_config.validate()?;
        Ok(Self {
            module: DmsModule::new(config, intrinsics, fps)?,
            alerts: AlertManager::new(alert_config),
            source,
            provider,
            sink,
            frames: 0,
        })
    }

    /// Process the next frame. `Ok(None)` at end of stream.
    pub fn step(&mut self) -> Result<Option<FrameOutcome>, MonitorError> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        self.frames += 1;
        counter!("dms_frames_total").increment(1);

        let outcome = match self.provider.detect(&frame) {
            Ok(landmarks) => self.module.process(frame.timestamp(), landmarks.as_ref()),
            Err(e) => {
                warn!("Landmark detection failed on frame {}: {}", frame.sequence, e);
                self.module.skip(frame.timestamp(), e)
            }
        };
        match &outcome {
            FrameOutcome::Evaluated(report) => {
                gauge!("dms_drowsy_fraction").set(report.window.drowsy_fraction);
                if report.has_alert() {
                    let alert = DrowsinessAlert {
                        timestamp: report.timestamp,
                        drowsy_fraction: report.window.drowsy_fraction,
                        drowsiness_time_secs: report.window.drowsiness_time_secs,
                    };
                    if self.alerts.dispatch(&alert, &self.sink) {
                        counter!("dms_alerts_total").increment(1);
                    }
                }
            }
            FrameOutcome::Skipped(reason) => {
                debug!("Frame {} skipped: {}", frame.sequence, reason);
                counter!("dms_frames_skipped_total").increment(1);
            }
        }
        Ok(Some(outcome))
    }

    /// Run until end of stream or until `stop` is set, then summarize the session
    pub fn run(&mut self, stop: &AtomicBool) -> Result<SessionSummary, MonitorError> {
        info!("Starting frame loop");
        while !stop.load(Ordering::Relaxed) {
            if self.step()?.is_none() {
                info!("End of stream after {} frames", self.frames);
                break;
            }
        }
        if stop.load(Ordering::Relaxed) {
            info!("Frame loop stopped after {} frames", self.frames);
        }
        Ok(self.module.summary())
    }

    /// Collect a new neutral-pose baseline from the coming frames
    pub fn recalibrate(&mut self) {
        self.module.recalibrate();
    }

    /// Frames pulled from the source so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn module(&self) -> &DmsModule {
        &self.module
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{CameraError, FrameSequence, VideoFrame};
    use dms::synthetic::{FaceParams, SyntheticFace};
    use dms::{Classification, DmsError, LandmarkSet, Verdict};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<DrowsinessAlert>>);

    impl AlertSink for Recorder {
        fn notify(&self, alert: &DrowsinessAlert) {
            self.0.borrow_mut().push(*alert);
        }
    }

    /// Returns the same face for frames accepted by `with_face`, none otherwise
    struct Scripted {
        face: LandmarkSet,
        with_face: Box<dyn Fn(u32) -> bool>,
    }

    impl LandmarkProvider for Scripted {
        fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
            Ok((self.with_face)(frame.sequence).then(|| self.face.clone()))
        }
    }

    struct Failing;

    impl FrameSource for Failing {
        fn fps(&self) -> Option<f64> {
            Some(30.0)
        }

        fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
            Err(CameraError::Stream("device unplugged".into()))
        }
    }

    fn closed_eyes() -> (SyntheticFace, LandmarkSet) {
        let synth = SyntheticFace::default();
        let face = synth.landmarks(&FaceParams {
            eye_open: 0.0,
            ..Default::default()
        });
        (synth, face)
    }

    #[test]
    fn test_requires_frame_rate() {
        let (synth, face) = closed_eyes();
        let result = FrameLoop::new(
            FrameSequence::new(Vec::new(), None),
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        );
        assert!(matches!(result, Err(MonitorError::Dms(DmsError::InvalidConfiguration(_)))));
    }

    #[test]
    fn test_rejects_negative_cooldown() {
        let (synth, face) = closed_eyes();
        let result = FrameLoop::new(
            FrameSequence::synthetic(1, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig {
                cooldown_secs: -1.0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(MonitorError::Alert(_))));
    }

    #[test]
    fn test_drowsy_session_alerts_and_summarizes() {
        let (synth, face) = closed_eyes();
        let mut frame_loop = FrameLoop::new(
            FrameSequence::synthetic(301, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();

        let summary = frame_loop.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(frame_loop.frames(), 301);
        assert_eq!(summary.verdict, Verdict::Fatigued);
        assert_eq!(frame_loop.module().last_classification(), Some(Classification::Drowsy));

        // 10 frames to sustain the closure, then the fraction passes 8% of a
        // minute after 145 drowsy frames
        let alerts = frame_loop.sink().0.borrow();
        assert!(!alerts.is_empty());
        assert!(alerts.iter().all(|a| a.drowsy_fraction > 0.08));
        assert_eq!(alerts.len() as u64, frame_loop.alerts().fired());
    }

    #[test]
    fn test_cooldown_limits_alerts() {
        let (synth, face) = closed_eyes();
        let mut frame_loop = FrameLoop::new(
            FrameSequence::synthetic(300, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig {
                cooldown_secs: 60.0,
                ..Default::default()
            },
        )
        .unwrap();

        frame_loop.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(frame_loop.sink().0.borrow().len(), 1);
        assert!(frame_loop.alerts().suppressed() > 0);
    }

    #[test]
    fn test_missing_faces_are_skipped() {
        let (synth, face) = closed_eyes();
        let mut frame_loop = FrameLoop::new(
            FrameSequence::synthetic(20, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|seq| seq % 2 == 0) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();

        let mut skipped = 0;
        while let Some(outcome) = frame_loop.step().unwrap() {
            if outcome.is_skipped() {
                skipped += 1;
            }
        }
        assert_eq!(skipped, 10);
        assert_eq!(frame_loop.module().summary().evaluated_frames, 10);
    }

    struct Glitching;

    impl LandmarkProvider for Glitching {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
            Err(DmsError::Detection("model returned no output".into()))
        }
    }

    #[test]
    fn test_detector_failure_skips_frame() {
        let synth = SyntheticFace::default();
        let mut frame_loop = FrameLoop::new(
            FrameSequence::synthetic(3, 30.0, 640, 480),
            Glitching,
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();

        let outcome = frame_loop.step().unwrap().unwrap();
        assert!(matches!(outcome, FrameOutcome::Skipped(DmsError::Detection(_))));
        let summary = frame_loop.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(frame_loop.frames(), 3);
        assert_eq!(summary.evaluated_frames, 0);
    }

    /// Face on the first second of frames, then `Err` from the detector
    struct FailsAfterCalibration {
        face: LandmarkSet,
    }

    impl LandmarkProvider for FailsAfterCalibration {
        fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
            if frame.sequence < 30 {
                Ok(Some(self.face.clone()))
            } else {
                Err(DmsError::Detection("model returned no output".into()))
            }
        }
    }

    #[test]
    fn test_detector_failure_counts_toward_session_time() {
        let synth = SyntheticFace::default();
        let face = synth.landmarks(&FaceParams::default());

        let mut failing = FrameLoop::new(
            FrameSequence::synthetic(300, 30.0, 640, 480),
            FailsAfterCalibration { face: face.clone() },
            Recorder::default(),
            synth.intrinsics.clone(),
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();
        let mut absent = FrameLoop::new(
            FrameSequence::synthetic(300, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|seq| seq < 30) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();

        let failed = failing.run(&AtomicBool::new(false)).unwrap();
        let missing = absent.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(failed.evaluated_frames, 30);
        assert_eq!(failed.session_minutes, missing.session_minutes);
        assert!((failed.session_minutes - 299.0 / 30.0 / 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_stop_flag() {
        let (synth, face) = closed_eyes();
        let mut frame_loop = FrameLoop::new(
            FrameSequence::synthetic(100, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();

        let summary = frame_loop.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(frame_loop.frames(), 0);
        assert_eq!(summary.evaluated_frames, 0);
    }

    #[test]
    fn test_source_error_ends_run() {
        let (synth, face) = closed_eyes();
        let mut frame_loop = FrameLoop::new(
            Failing,
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            frame_loop.run(&AtomicBool::new(false)),
            Err(MonitorError::Camera(CameraError::Stream(_)))
        ));
    }

    #[test]
    fn test_recalibrate() {
        let synth = SyntheticFace::default();
        let face = synth.landmarks(&FaceParams::default());
        let mut frame_loop = FrameLoop::new(
            FrameSequence::synthetic(40, 30.0, 640, 480),
            Scripted { face, with_face: Box::new(|_| true) },
            Recorder::default(),
            synth.intrinsics,
            DmsConfig::default(),
            AlertConfig::default(),
        )
        .unwrap();

        frame_loop.run(&AtomicBool::new(false)).unwrap();
        assert!(frame_loop.module().baseline().is_some());
        frame_loop.recalibrate();
        assert!(frame_loop.module().is_calibrating());
    }
}
