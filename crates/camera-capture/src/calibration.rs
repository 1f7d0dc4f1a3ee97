//! Camera intrinsics
//!
//! Loaded once at startup from the JSON file written by the OpenCV
//! calibration script and immutable afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::CameraError;

/// Distortion vector lengths OpenCV can produce
const DISTORTION_LENGTHS: [usize; 6] = [0, 4, 5, 8, 12, 14];

/// Camera intrinsics and the extrinsics of the calibration views
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraIntrinsics {
    /// 3x3 camera matrix, row major
    pub camera_matrix: [[f64; 3]; 3],
    /// Distortion coefficients (k1, k2, p1, p2[, k3, ...])
    pub distortion: Vec<f64>,
    /// Rotation vectors of the calibration views
    pub rotation_vectors: Vec<[f64; 3]>,
    /// Translation vectors of the calibration views
    pub translation_vectors: Vec<[f64; 3]>,
}

/// Arbitrarily nested numeric arrays, as numpy's `tolist()` emits them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberTree {
    Leaf(f64),
    Node(Vec<NumberTree>),
}

impl NumberTree {
    fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<f64>) {
        match self {
            NumberTree::Leaf(v) => out.push(*v),
            NumberTree::Node(children) => children.iter().for_each(|c| c.flatten_into(out)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationFile {
    camera_matrix: NumberTree,
    #[serde(default)]
    distortion_coefficients: Option<NumberTree>,
    #[serde(default)]
    rotation_vectors: Option<NumberTree>,
    #[serde(default)]
    translation_vectors: Option<NumberTree>,
}

fn triples(tree: Option<&NumberTree>, field: &str) -> Result<Vec<[f64; 3]>, CameraError> {
    let values = tree.map(NumberTree::flatten).unwrap_or_default();
    if values.len() % 3 != 0 {
        return Err(CameraError::Calibration(format!(
            "{field} has {} values, expected a multiple of 3",
            values.len()
        )));
    }
    Ok(values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

impl CameraIntrinsics {
    /// Parse a calibration JSON document
    pub fn from_json_str(json: &str) -> Result<Self, CameraError> {
        let file: CalibrationFile =
            serde_json::from_str(json).map_err(|e| CameraError::Calibration(e.to_string()))?;

        let m = file.camera_matrix.flatten();
        if m.len() != 9 {
            return Err(CameraError::Calibration(format!(
                "camera_matrix has {} values, expected 9",
                m.len()
            )));
        }

        let intrinsics = Self {
            camera_matrix: [[m[0], m[1], m[2]], [m[3], m[4], m[5]], [m[6], m[7], m[8]]],
            distortion: file
                .distortion_coefficients
                .as_ref()
                .map(NumberTree::flatten)
                .unwrap_or_default(),
            rotation_vectors: triples(file.rotation_vectors.as_ref(), "rotation_vectors")?,
            translation_vectors: triples(file.translation_vectors.as_ref(), "translation_vectors")?,
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Load a calibration JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let intrinsics = Self::from_json_str(&json)?;
        info!(
            "Loaded camera calibration from {} (fx={:.1}, fy={:.1}, {} distortion terms)",
            path.display(),
            intrinsics.fx(),
            intrinsics.fy(),
            intrinsics.distortion.len()
        );
        Ok(intrinsics)
    }

    /// Pinhole approximation for an uncalibrated camera: focal length equal
    /// to the image width, principal point at the image centre, no distortion
    pub fn approximate(width: u32, height: u32) -> Self {
        warn!("No camera calibration configured, approximating intrinsics for {}x{}", width, height);
        let f = width as f64;
        Self {
            camera_matrix: [
                [f, 0.0, width as f64 / 2.0],
                [0.0, f, height as f64 / 2.0],
                [0.0, 0.0, 1.0],
            ],
            distortion: Vec::new(),
            rotation_vectors: Vec::new(),
            translation_vectors: Vec::new(),
        }
    }

    /// Check that the parameters describe a usable camera
    pub fn validate(&self) -> Result<(), CameraError> {
        if !self.camera_matrix.iter().flatten().all(|v| v.is_finite()) {
            return Err(CameraError::Calibration("camera_matrix contains non-finite values".into()));
        }
        if self.fx() <= 0.0 || self.fy() <= 0.0 {
            return Err(CameraError::Calibration(format!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx(),
                self.fy()
            )));
        }
        if !DISTORTION_LENGTHS.contains(&self.distortion.len()) {
            return Err(CameraError::Calibration(format!(
                "unsupported number of distortion coefficients: {}",
                self.distortion.len()
            )));
        }
        if !self.distortion.iter().all(|v| v.is_finite()) {
            return Err(CameraError::Calibration("distortion contains non-finite values".into()));
        }
        Ok(())
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[1][2]
    }

    fn coefficient(&self, idx: usize) -> f64 {
        self.distortion.get(idx).copied().unwrap_or(0.0)
    }

    /// Project a point on the normalized image plane (x/z, y/z) to pixels,
    /// applying Brown-Conrady radial (k1, k2, k3) and tangential (p1, p2)
    /// distortion. Higher-order terms are ignored.
    pub fn project_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let (k1, k2, p1, p2, k3) = (
            self.coefficient(0),
            self.coefficient(1),
            self.coefficient(2),
            self.coefficient(3),
            self.coefficient(4),
        );

        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        let skew = self.camera_matrix[0][1];
        (self.fx() * xd + skew * yd + self.cx(), self.fy() * yd + self.cy())
    }
}
