//! Neutral-pose baseline calibration
//!
//! During the first frames of a session the driver is assumed to look at the
//! road. Roll, pitch, yaw and gaze samples are collected into sorted buffers;
//! once every buffer is full their medians are frozen as the baseline that
//! deviation checks are measured against.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pose::PoseAngles;

/// Bounded, ascending buffer with O(1) median reads
#[derive(Debug, Clone)]
pub struct SortedWindow {
    values: Vec<f64>,
    capacity: usize,
}

impl SortedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert keeping ascending order. Returns false once the window is
    /// full (frozen) or for NaN samples.
    pub fn update(&mut self, value: f64) -> bool {
        if self.is_full() || value.is_nan() {
            return false;
        }
        let pos = self.values.partition_point(|&v| v <= value);
        self.values.insert(pos, value);
        true
    }

    /// Middle element, or the mean of the two middle elements
    pub fn median(&self) -> Option<f64> {
        let n = self.values.len();
        if n == 0 {
            return None;
        }
        let mid = n / 2;
        if n % 2 == 0 {
            Some((self.values[mid - 1] + self.values[mid]) / 2.0)
        } else {
            Some(self.values[mid])
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Neutral head pose and gaze of the current driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub gaze: f64,
}

/// Collects neutral samples and freezes the baseline
#[derive(Debug, Clone)]
pub struct BaselineCalibrator {
    roll: SortedWindow,
    pitch: SortedWindow,
    yaw: SortedWindow,
    gaze: SortedWindow,
    frozen: Option<Baseline>,
}

impl BaselineCalibrator {
    pub fn new(capacity: usize) -> Self {
        Self {
            roll: SortedWindow::new(capacity),
            pitch: SortedWindow::new(capacity),
            yaw: SortedWindow::new(capacity),
            gaze: SortedWindow::new(capacity),
            frozen: None,
        }
    }

    /// Whether samples are still being collected
    pub fn is_calibrating(&self) -> bool {
        self.frozen.is_none()
    }

    /// Feed one valid frame. No-op once the baseline is frozen.
    pub fn update(&mut self, pose: &PoseAngles, gaze: f64) {
        if self.frozen.is_some() {
            return;
        }
        if [pose.roll, pose.pitch, pose.yaw, gaze].iter().any(|v| v.is_nan()) {
            return;
        }

        self.roll.update(pose.roll);
        self.pitch.update(pose.pitch);
        self.yaw.update(pose.yaw);
        self.gaze.update(gaze);

        if self.roll.is_full() && self.pitch.is_full() && self.yaw.is_full() && self.gaze.is_full() {
            let baseline = self.running_median().unwrap_or_default();
            info!(
                "Baseline calibrated from {} frames: roll={:.2} pitch={:.2} yaw={:.2} gaze={:.2}",
                self.roll.len(),
                baseline.roll,
                baseline.pitch,
                baseline.yaw,
                baseline.gaze
            );
            self.frozen = Some(baseline);
        }
    }

    /// The frozen baseline, once calibration has completed
    pub fn baseline(&self) -> Option<Baseline> {
        self.frozen
    }

    /// Medians of the samples collected so far
    pub fn running_median(&self) -> Option<Baseline> {
        Some(Baseline {
            roll: self.roll.median()?,
            pitch: self.pitch.median()?,
            yaw: self.yaw.median()?,
            gaze: self.gaze.median()?,
        })
    }

    /// Samples collected so far
    pub fn samples(&self) -> usize {
        self.roll.len()
    }

    /// Discard the baseline and start collecting again
    pub fn recalibrate(&mut self) {
        info!("Recalibrating driver baseline");
        self.roll.clear();
        self.pitch.clear();
        self.yaw.clear();
        self.gaze.clear();
        self.frozen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_median_odd_and_even() {
        let mut window = SortedWindow::new(10);
        assert_eq!(window.median(), None);

        for v in [5.0, 1.0, 3.0] {
            window.update(v);
        }
        assert_eq!(window.values(), &[1.0, 3.0, 5.0]);
        assert_eq!(window.median(), Some(3.0));

        window.update(10.0);
        assert_eq!(window.median(), Some(4.0));
    }

    #[test]
    fn test_window_freezes_at_capacity() {
        let mut window = SortedWindow::new(3);
        assert!(window.update(1.0));
        assert!(window.update(2.0));
        assert!(window.update(3.0));
        assert!(window.is_full());
        assert!(!window.update(100.0));
        assert_eq!(window.median(), Some(2.0));
    }

    #[test]
    fn test_rejects_nan() {
        let mut window = SortedWindow::new(3);
        assert!(!window.update(f64::NAN));
        assert!(window.is_empty());
    }

    #[test]
    fn test_calibrator_freezes_after_capacity() {
        let mut calibrator = BaselineCalibrator::new(3);
        calibrator.update(&PoseAngles::new(1.0, 2.0, 3.0), 0.5);
        calibrator.update(&PoseAngles::new(2.0, 3.0, 4.0), 1.5);
        assert!(calibrator.is_calibrating());
        assert_eq!(calibrator.baseline(), None);
        assert_eq!(calibrator.running_median().unwrap().roll, 1.5);

        calibrator.update(&PoseAngles::new(3.0, 4.0, 5.0), 2.5);
        let baseline = calibrator.baseline().unwrap();
        assert_eq!(baseline, Baseline { roll: 2.0, pitch: 3.0, yaw: 4.0, gaze: 1.5 });

        // Frozen: later samples do not move it
        calibrator.update(&PoseAngles::new(90.0, 90.0, 90.0), 40.0);
        assert_eq!(calibrator.baseline(), Some(baseline));
        assert_eq!(calibrator.samples(), 3);
    }

    #[test]
    fn test_recalibrate() {
        let mut calibrator = BaselineCalibrator::new(1);
        calibrator.update(&PoseAngles::new(1.0, 1.0, 1.0), 1.0);
        assert!(!calibrator.is_calibrating());

        calibrator.recalibrate();
        assert!(calibrator.is_calibrating());
        assert_eq!(calibrator.samples(), 0);

        calibrator.update(&PoseAngles::new(7.0, 7.0, 7.0), 7.0);
        assert_eq!(calibrator.baseline().unwrap().roll, 7.0);
    }

    fn reference_median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        }
    }

    proptest! {
        #[test]
        fn prop_median_matches_reference(values in prop::collection::vec(-180.0f64..180.0, 1..60)) {
            let mut window = SortedWindow::new(values.len());
            for &v in &values {
                window.update(v);
            }
            prop_assert_eq!(window.median(), Some(reference_median(&values)));
            prop_assert!(window.values().windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn prop_median_independent_of_insertion_order(
            values in prop::collection::vec(-50.0f64..50.0, 1..40).prop_shuffle()
        ) {
            let mut forward = SortedWindow::new(values.len());
            let mut reversed = SortedWindow::new(values.len());
            for &v in &values {
                forward.update(v);
            }
            for &v in values.iter().rev() {
                reversed.update(v);
            }
            prop_assert_eq!(forward.median(), reversed.median());
        }
    }
}
