//! Screen capture
//!
//! ```text
//! CaptureToken ──> CapturerFactory ──> ScreenCapturer (native thread)
//!                                            │ FrameSink
//!                                            v
//!                     CapturePipeline ──broadcast──> VideoEncoder ──> track
//! ```

pub mod capture;
pub mod capturer;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod h264;
pub mod token;

pub use capture::{CaptureEvent, CapturePipeline, CaptureStats};
pub use capturer::{CapturerFactory, FrameSink, ScreenCapturer, SyntheticCapturerFactory};
pub use encoder::{EncoderFactory, PassthroughEncoderFactory, VideoCodec, VideoEncoder};
pub use format::{CaptureParams, PixelFormat, Resolution};
pub use frame::VideoFrame;
pub use token::{CaptureToken, GrantHandle, GrantState};
