//! Pixel formats and capture parameters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats a screen capturer may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// NV12 semi-planar (Y plane + interleaved UV), the usual GPU surface layout
    Nv12,
    /// I420 planar
    I420,
    /// BGRA 8-bit, common for desktop compositors
    Bgra,
    /// Already-encoded H.264 access units (hardware capture paths)
    H264,
}

impl PixelFormat {
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::H264)
    }

    /// Expected raw frame size, None for compressed formats
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        let pixels = resolution.pixels() as usize;
        match self {
            PixelFormat::Nv12 | PixelFormat::I420 => Some(pixels * 3 / 2),
            PixelFormat::Bgra => Some(pixels * 4),
            PixelFormat::H264 => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Nv12 => "NV12",
            PixelFormat::I420 => "I420",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::H264 => "H264",
        };
        write!(f, "{}", name)
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if resolution is within capturer limits
    pub fn is_valid(&self) -> bool {
        self.width >= 160 && self.width <= 7680 && self.height >= 120 && self.height <= 4320
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Parameters a capturer is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub resolution: Resolution,
    pub fps: u32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            resolution: Resolution::HD720,
            fps: 30,
        }
    }
}

impl CaptureParams {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            fps,
        }
    }

    /// Interval between frames at the target rate
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_micros(1_000_000 / self.fps.max(1) as u64)
    }
}

impl fmt::Display for CaptureParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}fps", self.resolution, self.fps)
    }
}
