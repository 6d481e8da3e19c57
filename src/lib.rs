//! Streamcaster - screen capture to WebRTC session manager
//!
//! Turns an OS screen capture grant into a single outbound WebRTC video
//! session with a strict lifecycle: one session at a time, full rollback on
//! startup failure, and a fixed teardown order.

pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod utils;
pub mod video;
pub mod webrtc;

pub use error::{AppError, Result};
