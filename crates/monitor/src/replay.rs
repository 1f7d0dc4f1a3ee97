//! Recorded landmark traces
//!
//! A trace is a JSON-lines file with one record per captured frame:
//!
//! ```json
//! {"timestamp_ms": 33.3, "width": 640, "height": 480, "normalized": true, "landmarks": [[0.51, 0.42, -0.03], ...]}
//! ```
//!
//! `landmarks` is `null` for frames where the detector found no face. The
//! trace is split into a frame source and a landmark provider so it can stand
//! in for a camera plus detector.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use camera_capture::{CameraError, FrameSequence, FrameSource, VideoFrame};
use dms::{DmsError, Landmark, LandmarkProvider, LandmarkSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Trace loading errors
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed trace record on line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Invalid trace record on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },
}

/// One captured frame of a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Capture time since the start of the recording
    pub timestamp_ms: f64,
    pub width: u32,
    pub height: u32,
    /// Coordinates are fractions of the frame size rather than pixels
    #[serde(default)]
    pub normalized: bool,
    pub landmarks: Option<Vec<[f64; 3]>>,
}

impl TraceRecord {
    fn landmark_set(&self) -> Option<LandmarkSet> {
        let points: Vec<Landmark> = self
            .landmarks
            .as_ref()?
            .iter()
            .map(|[x, y, z]| Landmark::new(*x, *y, *z))
            .collect();
        Some(if self.normalized {
            LandmarkSet::from_normalized(&points, self.width, self.height)
        } else {
            LandmarkSet::from_pixels(points)
        })
    }
}

/// A parsed landmark trace
#[derive(Debug, Clone, Default)]
pub struct ReplayTrace {
    records: Vec<TraceRecord>,
}

impl ReplayTrace {
    pub fn new(records: Vec<TraceRecord>) -> Self {
        Self { records }
    }

    /// Parse JSON lines. Blank lines are ignored; timestamps must be finite,
    /// non-negative and non-decreasing.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
        let mut records: Vec<TraceRecord> = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line_no = i + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: TraceRecord = serde_json::from_str(&line)
                .map_err(|source| ReplayError::Parse { line: line_no, source })?;

            if !record.timestamp_ms.is_finite() || record.timestamp_ms < 0.0 {
                return Err(ReplayError::InvalidRecord {
                    line: line_no,
                    reason: format!("timestamp {} is not a non-negative number", record.timestamp_ms),
                });
            }
            if let Some(prev) = records.last() {
                if record.timestamp_ms < prev.timestamp_ms {
                    return Err(ReplayError::InvalidRecord {
                        line: line_no,
                        reason: format!(
                            "timestamp {} goes backwards from {}",
                            record.timestamp_ms, prev.timestamp_ms
                        ),
                    });
                }
            }
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Load a trace file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let trace = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!("Loaded landmark trace {} ({} frames)", path.display(), trace.len());
        Ok(trace)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Frame size of the first record
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.records.first().map(|r| (r.width, r.height))
    }

    /// Mean capture rate over the whole trace
    pub fn fps(&self) -> Option<f64> {
        let first = self.records.first()?.timestamp_ms;
        let last = self.records.last()?.timestamp_ms;
        let span_secs = (last - first) / 1000.0;
        if self.records.len() < 2 || span_secs <= 0.0 {
            return None;
        }
        Some((self.records.len() - 1) as f64 / span_secs)
    }

    /// Split into a frame source and the matching landmark provider
    pub fn into_parts(self) -> (ReplayFrames, ReplayLandmarks) {
        let fps = self.fps();
        let mut frames = Vec::with_capacity(self.records.len());
        let mut landmarks = HashMap::new();

        for (seq, record) in self.records.iter().enumerate() {
            let sequence = seq as u32;
            let timestamp_ns = (record.timestamp_ms * 1e6).round() as u64;
            frames.push(VideoFrame::metadata_only(record.width, record.height, timestamp_ns, sequence));
            if let Some(set) = record.landmark_set() {
                landmarks.insert(sequence, set);
            }
        }

        debug!(
            "Trace split into {} frames, {} with a face",
            frames.len(),
            landmarks.len()
        );
        (
            ReplayFrames {
                frames: FrameSequence::new(frames, fps),
            },
            ReplayLandmarks { landmarks },
        )
    }
}

/// Frame source half of a trace
#[derive(Debug)]
pub struct ReplayFrames {
    frames: FrameSequence,
}

impl FrameSource for ReplayFrames {
    fn fps(&self) -> Option<f64> {
        self.frames.fps()
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        self.frames.next_frame()
    }
}

/// Landmark provider half of a trace, keyed by frame sequence number
#[derive(Debug, Default)]
pub struct ReplayLandmarks {
    landmarks: HashMap<u32, LandmarkSet>,
}

impl LandmarkProvider for ReplayLandmarks {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkSet>, DmsError> {
        Ok(self.landmarks.remove(&frame.sequence))
    }
}
