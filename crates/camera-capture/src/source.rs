//! Frame source abstraction

use std::collections::VecDeque;

use tracing::debug;

use crate::{CameraError, VideoFrame};

/// A lazy, non-restartable sequence of frames.
///
/// Live cameras block inside `next_frame` until the next frame is available.
/// File and trace sources return `Ok(None)` once exhausted, which is the normal
/// end-of-stream signal rather than an error.
pub trait FrameSource {
    /// Nominal capture rate reported by the device or container, if known
    fn fps(&self) -> Option<f64>;

    /// Acquire the next frame
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn fps(&self) -> Option<f64> {
        (**self).fps()
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        (**self).next_frame()
    }
}

/// In-memory frame source over pre-built frames
#[derive(Debug, Default)]
pub struct FrameSequence {
    frames: VecDeque<VideoFrame>,
    fps: Option<f64>,
}

impl FrameSequence {
    /// Create a source that yields `frames` in order
    pub fn new(frames: Vec<VideoFrame>, fps: Option<f64>) -> Self {
        Self {
            frames: frames.into(),
            fps,
        }
    }

    /// Synthesize `count` metadata-only frames spaced at `fps`
    pub fn synthetic(count: u32, fps: f64, width: u32, height: u32) -> Self {
        let step_ns = (1e9 / fps) as u64;
        let frames = (0..count)
            .map(|i| VideoFrame::metadata_only(width, height, i as u64 * step_ns, i))
            .collect();
        Self::new(frames, Some(fps))
    }

    /// Frames not yet consumed
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for FrameSequence {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let frame = self.frames.pop_front();
        if frame.is_none() {
            debug!("Frame sequence exhausted");
        }
        Ok(frame)
    }
}
