use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::session::PeerSessionConfig;
use crate::video::capture::DEFAULT_FRAME_CAPACITY;
use crate::video::encoder::VideoCodec;
use crate::video::format::{CaptureParams, Resolution};
use crate::webrtc::config::IceServerConfig;
use crate::webrtc::engine::EngineConfig;
use crate::webrtc::track::VideoTrackConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Screen capture settings
    pub capture: CaptureConfig,
    /// WebRTC transport settings
    pub webrtc: WebRtcConfig,
    /// Session lifecycle settings
    pub session: SessionConfig,
}

impl AppConfig {
    /// Reject values no session could start with
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        let resolution = Resolution::new(capture.width, capture.height);
        if !resolution.is_valid() {
            return Err(AppError::Config(format!(
                "capture resolution {} is outside 160x120..7680x4320",
                resolution
            )));
        }
        if capture.fps == 0 {
            return Err(AppError::Config("capture fps must be non-zero".to_string()));
        }
        if capture.frame_channel_capacity == 0 {
            return Err(AppError::Config(
                "capture frame_channel_capacity must be non-zero".to_string(),
            ));
        }

        self.webrtc.ice_servers.validate().map_err(AppError::Config)?;
        if self.webrtc.track_id.is_empty() || self.webrtc.stream_id.is_empty() {
            return Err(AppError::Config(
                "webrtc track_id and stream_id must be set".to_string(),
            ));
        }
        if self.session.command_channel_capacity == 0 {
            return Err(AppError::Config(
                "session command_channel_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the next session
    pub fn session_config(&self) -> PeerSessionConfig {
        PeerSessionConfig {
            capture: CaptureParams::new(self.capture.width, self.capture.height, self.capture.fps),
            frame_capacity: self.capture.frame_channel_capacity,
            ice_servers: self.webrtc.ice_servers.clone(),
            track: VideoTrackConfig {
                track_id: self.webrtc.track_id.clone(),
                stream_id: self.webrtc.stream_id.clone(),
                codec: self.webrtc.codec,
            },
            candidate_gather_wait: Duration::from_millis(self.webrtc.candidate_gather_wait_ms),
            disconnect_grace: Duration::from_millis(self.session.disconnect_grace_ms),
            command_capacity: self.session.command_channel_capacity,
        }
    }

    /// Settings for the shared media engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mdns_mode: self.webrtc.mdns_mode.clone(),
        }
    }
}

/// Screen capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames buffered between capturer and track
    pub frame_channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            frame_channel_capacity: DEFAULT_FRAME_CAPACITY,
        }
    }
}

/// WebRTC configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// Ordered STUN/TURN servers
    pub ice_servers: IceServerConfig,
    pub track_id: String,
    pub stream_id: String,
    pub codec: VideoCodec,
    /// Wait for local ICE candidates before returning an offer/answer
    pub candidate_gather_wait_ms: u64,
    /// mDNS candidate mode: "disabled", "query_only", "query_and_gather"
    pub mdns_mode: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: IceServerConfig::default(),
            track_id: "screenTrack".to_string(),
            stream_id: "streamcaster".to_string(),
            codec: VideoCodec::H264,
            candidate_gather_wait_ms: 100,
            mdns_mode: "query_only".to_string(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a disconnected/failed peer is tolerated while streaming
    pub disconnect_grace_ms: u64,
    pub command_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disconnect_grace_ms: 5000,
            command_channel_capacity: 32,
        }
    }
}
