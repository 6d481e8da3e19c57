//! System event types
//!
//! Everything the core reports outward goes through [`SystemEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{SessionResource, SessionState};
use crate::webrtc::signaling::{ConnectionState, IceCandidate};

/// System event enumeration
///
/// JSON structure like:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "session_id": "...", "state": "streaming", "reason": null, "at": "..." }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// Session entered a new state
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        session_id: String,
        state: SessionState,
        /// Terminal reason or error detail
        reason: Option<String>,
        at: DateTime<Utc>,
    },

    /// Locally gathered ICE candidate for the signaling collaborator
    #[serde(rename = "session.ice_candidate")]
    SessionIceCandidate {
        session_id: String,
        candidate: IceCandidate,
    },

    #[serde(rename = "session.connection_state")]
    SessionConnectionState {
        session_id: String,
        state: ConnectionState,
    },

    /// A session-owned resource was released during teardown
    #[serde(rename = "session.resource_released")]
    SessionResourceReleased {
        session_id: String,
        resource: SessionResource,
    },

    /// The OS revoked a capture grant
    #[serde(rename = "capture.revoked")]
    CaptureRevoked { token_id: Uuid },
}

impl SystemEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::SessionIceCandidate { .. } => "session.ice_candidate",
            Self::SessionConnectionState { .. } => "session.connection_state",
            Self::SessionResourceReleased { .. } => "session.resource_released",
            Self::CaptureRevoked { .. } => "capture.revoked",
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionStateChanged { session_id, .. }
            | Self::SessionIceCandidate { session_id, .. }
            | Self::SessionConnectionState { session_id, .. }
            | Self::SessionResourceReleased { session_id, .. } => Some(session_id),
            Self::CaptureRevoked { .. } => None,
        }
    }

    /// Match `topic` ("*", "session.*" or an exact event name)
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();
        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}
