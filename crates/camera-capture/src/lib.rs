//! Camera Capture Library for Driver Monitoring
//!
//! Provides the capture-side collaborators of the DMS pipeline:
//! - Video frames with monotonic capture timestamps
//! - The `FrameSource` seam (live camera, file, or recorded trace)
//! - Camera intrinsics loaded from an OpenCV-style calibration file

pub mod calibration;
pub mod frame;
pub mod source;

pub use calibration::CameraIntrinsics;
pub use frame::VideoFrame;
pub use source::{FrameSequence, FrameSource};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Invalid camera calibration: {0}")]
    Calibration(String),
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::Open(err.to_string())
    }
}
