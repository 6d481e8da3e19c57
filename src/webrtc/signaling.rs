//! Signaling value types exchanged with the external signaling collaborator
//!
//! The session never transports these itself; the host moves them over
//! whatever channel it uses (WebSocket, HTTP, ...).

use serde::{Deserialize, Serialize};

/// Envelope for hosts that want a ready-made wire shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer(SdpOffer),
    Answer(SdpAnswer),
    Candidate(IceCandidate),
    Close,
}

/// SDP offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpOffer {
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// SDP answer, optionally carrying candidates gathered while answering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAnswer {
    pub sdp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ice_candidates: Vec<IceCandidate>,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            ice_candidates: vec![],
        }
    }

    pub fn with_candidates(sdp: impl Into<String>, candidates: Vec<IceCandidate>) -> Self {
        Self {
            sdp: sdp.into(),
            ice_candidates: candidates,
        }
    }
}

/// ICE candidate in browser JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Peer connection state as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that start the disconnect grace timer
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_json_shape() {
        let candidate = IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host")
            .with_mid("0", 0);
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_message_tagging() {
        let msg = SignalingMessage::Offer(SdpOffer::new("v=0"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"offer\""));

        let parsed: SignalingMessage = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert!(matches!(parsed, SignalingMessage::Close));
    }

    #[test]
    fn test_degraded_states() {
        assert!(ConnectionState::Disconnected.is_degraded());
        assert!(ConnectionState::Failed.is_degraded());
        assert!(!ConnectionState::Connected.is_degraded());
    }
}
