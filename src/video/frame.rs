//! Video frame data structures

use bytes::Bytes;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// A captured frame with metadata
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Whether this is a key frame (compressed formats only)
    pub key_frame: bool,
    /// Frame sequence number, monotonically increasing per capturer
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
}

impl VideoFrame {
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            key_frame: !format.is_compressed(),
            sequence,
            capture_ts: Instant::now(),
        }
    }

    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frames_are_key_frames() {
        let frame = VideoFrame::new(
            Bytes::from_static(&[0u8; 16]),
            Resolution::new(4, 2),
            PixelFormat::Nv12,
            7,
        );
        assert!(frame.key_frame);
        assert_eq!(frame.len(), 16);
        assert_eq!(frame.sequence, 7);

        let encoded = VideoFrame::new(Bytes::new(), Resolution::HD720, PixelFormat::H264, 0);
        assert!(!encoded.key_frame);
        assert!(encoded.is_empty());
    }
}
