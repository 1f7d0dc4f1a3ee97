//! Synthetic faces for tests, benchmarks and dry runs.
//!
//! Builds a full refined face mesh by posing a small 3D face model in front of
//! a camera and projecting it. Only the landmarks the pipeline reads are
//! modelled; every other index sits on the nose tip.

use camera_capture::CameraIntrinsics;
use nalgebra::{Point3, Vector3};

use crate::landmarks::{index, Landmark, LandmarkSet};
use crate::pose::{frontal_rotation, rotation_from_angles, PoseAngles, MODEL_POINTS};

/// EAR of a fully open synthetic eye seen head on
pub const OPEN_EAR: f64 = 0.32;

const EYE_Y: f64 = 170.0;
const EYE_Z: f64 = -135.0;
const EYE_HALF_WIDTH: f64 = 75.0;
const RIGHT_EYE_CENTER_X: f64 = -150.0;
const LEFT_EYE_CENTER_X: f64 = 150.0;
const MOUTH_Y: f64 = -150.0;
const MOUTH_Z: f64 = -125.0;
const MOUTH_HALF_WIDTH: f64 = 150.0;

/// Expression and pose of a synthetic face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceParams {
    pub pose: PoseAngles,
    /// 1.0 gives `OPEN_EAR` head on, 0.0 closes the lids completely
    pub eye_open: f64,
    /// Head-on MAR
    pub mouth_open: f64,
    /// Horizontal iris offset as a fraction of the eye half-width
    pub gaze_offset: f64,
}

impl Default for FaceParams {
    fn default() -> Self {
        Self {
            pose: PoseAngles::default(),
            eye_open: 1.0,
            mouth_open: 0.05,
            gaze_offset: 0.0,
        }
    }
}

/// Camera and placement used to render synthetic faces
#[derive(Debug, Clone)]
pub struct SyntheticFace {
    pub intrinsics: CameraIntrinsics,
    /// Distance from the camera to the nose tip (model units)
    pub distance: f64,
    /// Lateral offset of the head in camera coordinates (model units)
    pub offset: Vector3<f64>,
}

impl Default for SyntheticFace {
    fn default() -> Self {
        Self {
            intrinsics: CameraIntrinsics {
                camera_matrix: [[640.0, 0.0, 320.0], [0.0, 640.0, 240.0], [0.0, 0.0, 1.0]],
                distortion: Vec::new(),
                rotation_vectors: Vec::new(),
                translation_vectors: Vec::new(),
            },
            distance: 1500.0,
            offset: Vector3::zeros(),
        }
    }
}

impl SyntheticFace {
    /// 3D model points keyed by landmark index
    fn model(params: &FaceParams) -> Vec<(usize, Point3<f64>)> {
        let lid = params.eye_open * OPEN_EAR * EYE_HALF_WIDTH;
        // Three lip gaps over twice the mouth width
        let lip = params.mouth_open * 2.0 * (2.0 * MOUTH_HALF_WIDTH) / 3.0;
        let iris_dx = params.gaze_offset * EYE_HALF_WIDTH;
        let eye = |x: f64, dy: f64| Point3::new(x, EYE_Y + dy, EYE_Z);
        let mouth = |x: f64, dy: f64| Point3::new(x, MOUTH_Y + dy, MOUTH_Z);

        let mut points: Vec<(usize, Point3<f64>)> = MODEL_POINTS
            .iter()
            .map(|(idx, [x, y, z])| (*idx, Point3::new(*x, *y, *z)))
            .collect();

        let r = RIGHT_EYE_CENTER_X;
        let l = LEFT_EYE_CENTER_X;
        points.extend([
            // Right eye: outer corner 33 comes from the pose model
            (160, eye(r - 25.0, lid)),
            (158, eye(r + 25.0, lid)),
            (133, eye(r + EYE_HALF_WIDTH, 0.0)),
            (153, eye(r + 25.0, -lid)),
            (144, eye(r - 25.0, -lid)),
            // Left eye: outer corner 263 comes from the pose model
            (362, eye(l - EYE_HALF_WIDTH, 0.0)),
            (385, eye(l - 25.0, lid)),
            (387, eye(l + 25.0, lid)),
            (373, eye(l + 25.0, -lid)),
            (380, eye(l - 25.0, -lid)),
            // Lips: corners 61 and 291 come from the pose model
            (39, mouth(-75.0, lip / 2.0)),
            (181, mouth(-75.0, -lip / 2.0)),
            (0, mouth(0.0, lip / 2.0)),
            (17, mouth(0.0, -lip / 2.0)),
            (269, mouth(75.0, lip / 2.0)),
            (405, mouth(75.0, -lip / 2.0)),
            (index::RIGHT_IRIS_CENTER, eye(r + iris_dx, 0.0)),
            (index::LEFT_IRIS_CENTER, eye(l + iris_dx, 0.0)),
        ]);
        points
    }

    /// Render the face to pixel landmarks
    pub fn landmarks(&self, params: &FaceParams) -> LandmarkSet {
        let rotation = rotation_from_angles(&params.pose) * frontal_rotation();
        let translation = Vector3::new(0.0, 0.0, self.distance) + self.offset;

        let project = |p: &Point3<f64>| {
            let c = rotation * p.coords + translation;
            let (u, v) = self.intrinsics.project_normalized(c.x / c.z, c.y / c.z);
            Landmark::new(u, v, c.z - translation.z)
        };

        let nose = project(&Point3::origin());
        let mut points = vec![nose; index::REFINED_MESH_POINTS];
        for (idx, p) in Self::model(params) {
            points[idx] = project(&p);
        }
        LandmarkSet::from_pixels(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features;

    #[test]
    fn test_head_on_ratios_match_params() {
        let face = SyntheticFace::default().landmarks(&FaceParams {
            eye_open: 1.0,
            mouth_open: 0.9,
            gaze_offset: 0.5,
            ..Default::default()
        });
        let ratios = features::measure(&face).unwrap();
        assert!((ratios.ear - OPEN_EAR).abs() < 1e-9);
        assert!((ratios.mar - 0.9).abs() < 0.02);
        assert!((ratios.gaze - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_closed_eyes() {
        let face = SyntheticFace::default().landmarks(&FaceParams {
            eye_open: 0.0,
            ..Default::default()
        });
        assert_eq!(features::compute_ear(&face).unwrap(), 0.0);
    }
}
