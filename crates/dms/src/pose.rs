//! Head pose estimation
//!
//! Solves the perspective-n-point problem for six facial landmarks against a
//! generic 3D face model by Levenberg-Marquardt minimisation of the
//! reprojection error.
//!
//! Angle convention: the solved camera-frame rotation `R` is taken relative to
//! a face looking straight into the camera, `R_rel = R * R_front^T` with
//! `R_front = Rx(pi)`, and decomposed as `R_rel = Rz(roll) * Ry(yaw) * Rx(pitch)`
//! in camera axes (x right, y down, z forward). A frontal face is (0, 0, 0), so
//! ordinary driving poses stay far from the +/-180 degree seam. At gimbal lock
//! (yaw = +/-90) roll is pinned to zero and pitch carries the remaining
//! rotation.

use std::f64::consts::PI;

use camera_capture::CameraIntrinsics;
use nalgebra::{Point3, Rotation3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::landmarks::{index, LandmarkSet};
use crate::{DmsConfig, DmsError};

const NUM_POINTS: usize = 6;
const NUM_RESIDUALS: usize = NUM_POINTS * 2;
const MAX_ITERATIONS: usize = 100;
const MAX_DAMPING: f64 = 1e12;
const GIMBAL_EPSILON: f64 = 1e-6;

type Jacobian = SMatrix<f64, NUM_RESIDUALS, 6>;
type Residuals = SVector<f64, NUM_RESIDUALS>;

/// Landmark indices and the matching generic 3D model points (y up, nose at
/// the origin, the face looking towards +z)
pub const MODEL_POINTS: [(usize, [f64; 3]); NUM_POINTS] = [
    (index::NOSE_TIP, [0.0, 0.0, 0.0]),
    (index::CHIN, [0.0, -330.0, -65.0]),
    (index::RIGHT_EYE_OUTER, [-225.0, 170.0, -135.0]),
    (index::LEFT_EYE_OUTER, [225.0, 170.0, -135.0]),
    (index::MOUTH_RIGHT, [-150.0, -150.0, -125.0]),
    (index::MOUTH_LEFT, [150.0, -150.0, -125.0]),
];

/// Head orientation in degrees, each in [-180, 180]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseAngles {
    /// Tilt towards a shoulder (about the camera z axis)
    pub roll: f64,
    /// Nodding (about the camera x axis)
    pub pitch: f64,
    /// Turning left/right (about the camera y axis)
    pub yaw: f64,
}

impl PoseAngles {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }
}

/// Signed difference `a - b` wrapped into [-180, 180]
pub fn angle_delta(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Rotation of a face looking straight into the camera
pub fn frontal_rotation() -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::x_axis(), PI)
}

/// Relative head rotation for the given angles
pub fn rotation_from_angles(angles: &PoseAngles) -> Rotation3<f64> {
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), angles.roll.to_radians());
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), angles.yaw.to_radians());
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), angles.pitch.to_radians());
    rz * ry * rx
}

/// Decompose a relative head rotation into roll/pitch/yaw
pub fn angles_from_rotation(rotation: &Rotation3<f64>) -> PoseAngles {
    let m = rotation.matrix();
    let cos_yaw = m[(0, 0)].hypot(m[(1, 0)]);
    let yaw = (-m[(2, 0)]).atan2(cos_yaw);

    let (roll, pitch) = if cos_yaw > GIMBAL_EPSILON {
        (m[(1, 0)].atan2(m[(0, 0)]), m[(2, 1)].atan2(m[(2, 2)]))
    } else {
        (0.0, (-m[(1, 2)]).atan2(m[(1, 1)]))
    };

    PoseAngles {
        roll: roll.to_degrees(),
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
    }
}

/// Full result of a pose solve
#[derive(Debug, Clone)]
pub struct PoseSolution {
    pub angles: PoseAngles,
    /// Model-to-camera rotation
    pub rotation: Rotation3<f64>,
    /// Model origin in camera coordinates
    pub translation: Vector3<f64>,
    /// RMS reprojection error (pixels)
    pub rms_error: f64,
    pub iterations: usize,
}

/// Perspective-n-point head pose estimator
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    intrinsics: CameraIntrinsics,
    model: [Point3<f64>; NUM_POINTS],
    max_reprojection_error: f64,
}

impl PoseEstimator {
    pub fn new(intrinsics: CameraIntrinsics, config: &DmsConfig) -> Result<Self, DmsError> {
        intrinsics
            .validate()
            .map_err(|e| DmsError::Intrinsics(e.to_string()))?;

        Ok(Self {
            intrinsics,
            model: MODEL_POINTS.map(|(_, [x, y, z])| Point3::new(x, y, z)),
            max_reprojection_error: config.max_reprojection_error_px,
        })
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Estimate head orientation
    pub fn estimate(&self, landmarks: &LandmarkSet) -> Result<PoseAngles, DmsError> {
        self.solve(landmarks).map(|s| s.angles)
    }

    /// Solve for the full head pose
    pub fn solve(&self, landmarks: &LandmarkSet) -> Result<PoseSolution, DmsError> {
        let mut observed = [(0.0, 0.0); NUM_POINTS];
        for (slot, (idx, _)) in observed.iter_mut().zip(MODEL_POINTS.iter()) {
            let p = landmarks.get(*idx)?;
            *slot = (p.x, p.y);
        }

        let (mut rotation, mut translation) = self.initial_guess(&observed)?;
        let mut residuals = self
            .residuals(&rotation, &translation, &observed)
            .ok_or_else(|| DmsError::PoseSolve("initial guess behind the camera".into()))?;
        let mut cost = residuals.norm_squared();
        let mut damping = 1e-3;
        let mut iterations = 0;

        while iterations < MAX_ITERATIONS && damping < MAX_DAMPING {
            iterations += 1;
            let jacobian = self.jacobian(&rotation, &translation, &observed, &residuals);
            let jt = jacobian.transpose();
            let hessian = jt * jacobian;
            let gradient = jt * residuals;

            let mut damped = hessian;
            for i in 0..6 {
                damped[(i, i)] += damping * hessian[(i, i)].max(1e-9);
            }

            let Some(step) = damped.cholesky().map(|c| c.solve(&(-gradient))) else {
                damping *= 10.0;
                continue;
            };

            let candidate_rotation = Rotation3::new(step.fixed_rows::<3>(0).into_owned()) * rotation;
            let candidate_translation = translation + step.fixed_rows::<3>(3).into_owned();

            match self.residuals(&candidate_rotation, &candidate_translation, &observed) {
                Some(candidate) if candidate.norm_squared() < cost => {
                    let improvement = cost - candidate.norm_squared();
                    rotation = candidate_rotation;
                    translation = candidate_translation;
                    residuals = candidate;
                    cost = residuals.norm_squared();
                    damping = (damping / 10.0).max(1e-12);

                    if improvement <= 1e-12 * cost.max(1e-12) || step.norm() < 1e-12 {
                        break;
                    }
                }
                _ => damping *= 10.0,
            }
        }

        let rms_error = (cost / NUM_POINTS as f64).sqrt();
        if !rms_error.is_finite() || !translation.iter().all(|v| v.is_finite()) {
            return Err(DmsError::PoseSolve("solver diverged".into()));
        }
        if rms_error > self.max_reprojection_error {
            return Err(DmsError::PoseSolve(format!(
                "reprojection error {:.2}px exceeds {:.2}px",
                rms_error, self.max_reprojection_error
            )));
        }

        let angles = angles_from_rotation(&(rotation * frontal_rotation().inverse()));
        debug!(
            "Pose solved in {} iterations (rms {:.3}px): roll={:.2} pitch={:.2} yaw={:.2}",
            iterations, rms_error, angles.roll, angles.pitch, angles.yaw
        );

        Ok(PoseSolution {
            angles,
            rotation,
            translation,
            rms_error,
            iterations,
        })
    }

    /// Project a model point to pixels, `None` if it lies behind the camera
    pub fn project(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        point: &Point3<f64>,
    ) -> Option<(f64, f64)> {
        let p = rotation * point.coords + translation;
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(self.intrinsics.project_normalized(p.x / p.z, p.y / p.z))
    }

    /// Frontal face placed so that its projected centroid and spread match
    /// the observed points
    fn initial_guess(
        &self,
        observed: &[(f64, f64); NUM_POINTS],
    ) -> Result<(Rotation3<f64>, Vector3<f64>), DmsError> {
        let n = NUM_POINTS as f64;
        let (u_mean, v_mean) = observed
            .iter()
            .fold((0.0, 0.0), |(su, sv), (u, v)| (su + u / n, sv + v / n));
        let image_spread = (observed
            .iter()
            .map(|(u, v)| (u - u_mean).powi(2) + (v - v_mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        if !image_spread.is_finite() || image_spread < 1e-6 {
            return Err(DmsError::PoseSolve("landmarks are degenerate".into()));
        }

        let rotation = frontal_rotation();
        let rotated: Vec<Vector3<f64>> = self.model.iter().map(|p| rotation * p.coords).collect();
        let centroid = rotated.iter().sum::<Vector3<f64>>() / n;
        let model_spread = (rotated
            .iter()
            .map(|p| (p.x - centroid.x).powi(2) + (p.y - centroid.y).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        let focal = (self.intrinsics.fx() + self.intrinsics.fy()) / 2.0;
        let depth = focal * model_spread / image_spread;
        let translation = Vector3::new(
            (u_mean - self.intrinsics.cx()) / self.intrinsics.fx() * depth - centroid.x,
            (v_mean - self.intrinsics.cy()) / self.intrinsics.fy() * depth - centroid.y,
            depth - centroid.z,
        );
        Ok((rotation, translation))
    }

    fn residuals(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        observed: &[(f64, f64); NUM_POINTS],
    ) -> Option<Residuals> {
        let mut r = Residuals::zeros();
        for (i, (point, (u, v))) in self.model.iter().zip(observed).enumerate() {
            let (pu, pv) = self.project(rotation, translation, point)?;
            r[2 * i] = pu - u;
            r[2 * i + 1] = pv - v;
        }
        Some(r)
    }

    /// Forward-difference Jacobian w.r.t. a rotation perturbation applied on
    /// the left and a translation offset
    fn jacobian(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        observed: &[(f64, f64); NUM_POINTS],
        base: &Residuals,
    ) -> Jacobian {
        let mut jacobian = Jacobian::zeros();
        for k in 0..6 {
            let step = if k < 3 { 1e-7 } else { 1e-6 * translation.norm().max(1.0) };
            let mut delta = Vector3::zeros();
            delta[k % 3] = step;

            let perturbed = if k < 3 {
                self.residuals(&(Rotation3::new(delta) * rotation), translation, observed)
            } else {
                self.residuals(rotation, &(translation + delta), observed)
            };

            if let Some(perturbed) = perturbed {
                jacobian.set_column(k, &((perturbed - base) / step));
            }
        }
        jacobian
    }
}
