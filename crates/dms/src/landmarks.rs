//! Facial landmark sets and the landmark provider seam

use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};

use crate::DmsError;

/// MediaPipe Face Mesh landmark indices
pub mod index {
    /// Points in the base mesh
    pub const MESH_POINTS: usize = 468;
    /// Points in the mesh with refined iris landmarks
    pub const REFINED_MESH_POINTS: usize = 478;

    /// Subject's left eye contour: inner corner, upper lid x2, outer corner, lower lid x2
    pub const LEFT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
    /// Subject's right eye contour: outer corner, upper lid x2, inner corner, lower lid x2
    pub const RIGHT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];

    /// Mouth: left/right corners, then three upper/lower lip pairs
    pub const MOUTH: [usize; 8] = [61, 291, 39, 181, 0, 17, 269, 405];

    pub const LEFT_IRIS_CENTER: usize = 473;
    pub const RIGHT_IRIS_CENTER: usize = 468;

    pub const NOSE_TIP: usize = 1;
    pub const CHIN: usize = 152;
    pub const LEFT_EYE_OUTER: usize = 263;
    pub const RIGHT_EYE_OUTER: usize = 33;
    pub const MOUTH_LEFT: usize = 291;
    pub const MOUTH_RIGHT: usize = 61;
}

/// A single landmark in pixel space (z is relative depth)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the image plane
    pub fn distance(&self, other: &Landmark) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Midpoint in the image plane
    pub fn midpoint(&self, other: &Landmark) -> Landmark {
        Landmark::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0, (self.z + other.z) / 2.0)
    }
}

/// Landmarks of one face, indexed consistently across frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    /// Wrap points already expressed in pixels
    pub fn from_pixels(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Scale normalized (0..1) detector output to pixels. Depth is scaled by
    /// the width, matching the detector's convention.
    pub fn from_normalized(points: &[Landmark], width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        Self {
            points: points
                .iter()
                .map(|p| Landmark::new(p.x * w, p.y * h, p.z * w))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether refined iris landmarks are present
    pub fn has_iris(&self) -> bool {
        self.points.len() >= index::REFINED_MESH_POINTS
    }

    /// Landmark at `idx`
    pub fn get(&self, idx: usize) -> Result<Landmark, DmsError> {
        self.points.get(idx).copied().ok_or(DmsError::MissingLandmark(idx))
    }

    /// Landmarks at a fixed set of indices
    pub fn select<const N: usize>(&self, indices: &[usize; N]) -> Result<[Landmark; N], DmsError> {
        let mut out = [Landmark::default(); N];
        for (slot, &idx) in out.iter_mut().zip(indices) {
            *slot = self.get(idx)?;
        }
        Ok(out)
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }
}

/// External facial landmark detector.
///
/// Returns `Ok(None)` when no face is found; that is an expected per-frame
/// outcome, not an error.
pub trait LandmarkProvider {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError>;
}

impl<P: LandmarkProvider + ?Sized> LandmarkProvider for Box<P> {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
        (**self).detect(frame)
    }
}
