//! WebRTC transport for screen sharing
//!
//! ```text
//! MediaEngine (shared, refcounted)
//!        |
//!        v
//! PeerLink (RTCPeerConnection) <── ScreenVideoTrack <── CapturePipeline
//!        |
//! Viewer <──── SDP / ICE via host signaling ────> PeerSession
//! ```

pub mod config;
pub mod engine;
pub mod mdns;
pub mod peer;
pub mod signaling;
pub mod track;

pub use config::{IceServer, IceServerConfig};
pub use engine::{EngineConfig, EngineFactory, EngineHandle, MediaEngine, WebRtcEngineFactory};
pub use peer::{PeerEvent, PeerLink};
pub use signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer, SignalingMessage};
pub use track::{ScreenVideoTrack, VideoTrackConfig, VideoTrackStats};
