//! Video frame types

use std::time::Duration;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3), empty for metadata-only frames
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds, monotonic)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Frame without pixel payload, as produced by recorded landmark traces
    pub fn metadata_only(width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self::new(Vec::new(), width, height, timestamp_ns, sequence)
    }

    /// Capture timestamp as a duration since the source's epoch
    pub fn timestamp(&self) -> Duration {
        Duration::from_nanos(self.timestamp_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion() {
        let frame = VideoFrame::metadata_only(640, 480, 1_500_000_000, 7);
        assert_eq!(frame.timestamp(), Duration::from_millis(1500));
        assert_eq!(frame.sequence, 7);
    }
}
