//! Video encoder capability
//!
//! Encoders are provided by the media engine's [`EncoderFactory`]; their
//! internals (hardware or software) live outside this crate. The built-in
//! [`PassthroughEncoderFactory`] forwards the capturer payload unchanged,
//! which is what hardware capture paths that already deliver encoded access
//! units need. It refuses raw frames and frames of another codec.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::format::{CaptureParams, PixelFormat};
use super::frame::VideoFrame;
use super::h264;
use crate::error::{AppError, Result};

/// Video codec negotiated on the track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    VP8,
    VP9,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
        }
    }

    /// RTP clock rate (always 90kHz for video)
    pub fn clock_rate(&self) -> u32 {
        90000
    }

    /// Codec of an already-compressed capture format
    pub fn from_pixel_format(format: PixelFormat) -> Option<VideoCodec> {
        match format {
            PixelFormat::H264 => Some(VideoCodec::H264),
            PixelFormat::Nv12 | PixelFormat::I420 | PixelFormat::Bgra => None,
        }
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::VP8 => write!(f, "VP8"),
            VideoCodec::VP9 => write!(f, "VP9"),
        }
    }
}

/// One encoded access unit ready for the track
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub key_frame: bool,
    pub duration: Duration,
}

/// Per-session encoder instance
pub trait VideoEncoder: Send {
    /// Encode one frame; `None` means the encoder buffered it
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedFrame>>;

    fn codec(&self) -> VideoCodec;
}

/// Encoder factory owned by the media engine
pub trait EncoderFactory: Send + Sync {
    fn create(&self, codec: VideoCodec, params: CaptureParams) -> Result<Box<dyn VideoEncoder>>;

    fn supported_codecs(&self) -> Vec<VideoCodec>;
}

/// Forwards frame payloads as-is
#[derive(Debug, Default)]
pub struct PassthroughEncoderFactory;

impl EncoderFactory for PassthroughEncoderFactory {
    fn create(&self, codec: VideoCodec, params: CaptureParams) -> Result<Box<dyn VideoEncoder>> {
        if params.fps == 0 {
            return Err(AppError::Encoder("frame rate must be non-zero".to_string()));
        }
        Ok(Box::new(PassthroughEncoder {
            codec,
            duration: params.frame_interval(),
        }))
    }

    fn supported_codecs(&self) -> Vec<VideoCodec> {
        vec![VideoCodec::H264, VideoCodec::VP8, VideoCodec::VP9]
    }
}

struct PassthroughEncoder {
    codec: VideoCodec,
    duration: Duration,
}

impl VideoEncoder for PassthroughEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedFrame>> {
        if frame.is_empty() {
            return Ok(None);
        }
        if !frame.format.is_compressed() {
            return Err(AppError::Encoder(format!(
                "passthrough cannot encode raw {} frames",
                frame.format
            )));
        }
        if VideoCodec::from_pixel_format(frame.format) != Some(self.codec) {
            return Err(AppError::Encoder(format!(
                "{} frame on a {} track",
                frame.format, self.codec
            )));
        }
        if self.codec == VideoCodec::H264 && h264::nal_units(frame.data()).is_empty() {
            return Err(AppError::Encoder(
                "H.264 frame without Annex B start code".to_string(),
            ));
        }
        Ok(Some(EncodedFrame {
            data: frame.data_bytes(),
            key_frame: frame.key_frame,
            duration: self.duration,
        }))
    }

    fn codec(&self) -> VideoCodec {
        self.codec
    }
}
