//! Geometric facial features: eye aspect ratio, mouth aspect ratio, gaze

use serde::{Deserialize, Serialize};

use crate::landmarks::{index, Landmark, LandmarkSet};
use crate::{DmsConfig, DmsError};

const EPSILON: f64 = 1e-9;

/// Features of one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Mean eye aspect ratio of both eyes
    pub ear: f64,
    /// Mouth aspect ratio
    pub mar: f64,
    /// Gaze offset from straight ahead (degrees)
    pub gaze: f64,
    /// Yawn in progress
    pub yawning: bool,
}

/// Raw ratios measured from one landmark set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRatios {
    pub ear: f64,
    pub mar: f64,
    pub gaze: f64,
}

/// EAR = (|p1-p5| + |p2-p4|) / (2 |p0-p3|)
pub fn eye_aspect_ratio(eye: &[Landmark; 6]) -> f64 {
    let width = eye[0].distance(&eye[3]);
    if width < EPSILON {
        return 0.0;
    }
    (eye[1].distance(&eye[5]) + eye[2].distance(&eye[4])) / (2.0 * width)
}

/// MAR = (|p2-p3| + |p4-p5| + |p6-p7|) / (2 |p0-p1|)
pub fn mouth_aspect_ratio(mouth: &[Landmark; 8]) -> f64 {
    let width = mouth[0].distance(&mouth[1]);
    if width < EPSILON {
        return 0.0;
    }
    (mouth[2].distance(&mouth[3]) + mouth[4].distance(&mouth[5]) + mouth[6].distance(&mouth[7]))
        / (2.0 * width)
}

/// Angle between the iris direction and straight ahead, treating the eye
/// half-width as the eyeball radius.
fn eye_gaze(eye: &[Landmark; 6], iris: &Landmark) -> f64 {
    let half_width = eye[0].distance(&eye[3]) / 2.0;
    if half_width < EPSILON {
        return 0.0;
    }
    let offset = eye[0].midpoint(&eye[3]).distance(iris) / half_width;
    offset.clamp(0.0, 1.0).asin().to_degrees()
}

/// Mean EAR of both eyes
pub fn compute_ear(landmarks: &LandmarkSet) -> Result<f64, DmsError> {
    let left = landmarks.select(&index::LEFT_EYE)?;
    let right = landmarks.select(&index::RIGHT_EYE)?;
    Ok((eye_aspect_ratio(&left) + eye_aspect_ratio(&right)) / 2.0)
}

pub fn compute_mar(landmarks: &LandmarkSet) -> Result<f64, DmsError> {
    Ok(mouth_aspect_ratio(&landmarks.select(&index::MOUTH)?))
}

/// Mean gaze angle of both eyes (degrees); needs refined iris landmarks
pub fn compute_gaze(landmarks: &LandmarkSet) -> Result<f64, DmsError> {
    let left = landmarks.select(&index::LEFT_EYE)?;
    let right = landmarks.select(&index::RIGHT_EYE)?;
    let left_iris = landmarks.get(index::LEFT_IRIS_CENTER)?;
    let right_iris = landmarks.get(index::RIGHT_IRIS_CENTER)?;
    Ok((eye_gaze(&left, &left_iris) + eye_gaze(&right, &right_iris)) / 2.0)
}

/// Measure all ratios, failing if any landmark is missing
pub fn measure(landmarks: &LandmarkSet) -> Result<FaceRatios, DmsError> {
    Ok(FaceRatios {
        ear: compute_ear(landmarks)?,
        mar: compute_mar(landmarks)?,
        gaze: compute_gaze(landmarks)?,
    })
}

/// Exponential moving average
#[derive(Debug, Clone)]
struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (sample - prev),
            None => sample,
        };
        self.value = Some(next);
        next
    }
}

/// Turns landmark sets into feature frames, smoothing the ratios and
/// latching the yawn flag between the two MAR thresholds.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    mar_thresh: f64,
    mar_thresh2: f64,
    yawning: bool,
    ear: Ema,
    mar: Ema,
    gaze: Ema,
}

impl FeatureExtractor {
    pub fn new(config: &DmsConfig) -> Self {
        Self {
            mar_thresh: config.mar_thresh,
            mar_thresh2: config.mar_thresh2,
            yawning: false,
            ear: Ema::new(config.smoothing_alpha),
            mar: Ema::new(config.smoothing_alpha),
            gaze: Ema::new(config.smoothing_alpha),
        }
    }

    /// Extract features. On error no internal state changes.
    pub fn extract(&mut self, landmarks: &LandmarkSet) -> Result<FeatureFrame, DmsError> {
        let ratios = measure(landmarks)?;

        let ear = self.ear.update(ratios.ear);
        let mar = self.mar.update(ratios.mar);
        let gaze = self.gaze.update(ratios.gaze);

        if mar > self.mar_thresh {
            self.yawning = true;
        } else if mar < self.mar_thresh2 {
            self.yawning = false;
        }

        Ok(FeatureFrame {
            ear,
            mar,
            gaze,
            yawning: self.yawning,
        })
    }

    pub fn reset(&mut self) {
        self.yawning = false;
        self.ear.value = None;
        self.mar.value = None;
        self.gaze.value = None;
    }
}
