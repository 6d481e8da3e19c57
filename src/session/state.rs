//! Session state machine types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CaptureError, ConnectionError, EngineInitError, SessionError};

/// Lifecycle state of a screen sharing session
///
/// ```text
/// Created ──> CaptureStarting ──> Streaming ──> Stopping ──> Stopped
///    │               │                │
///    └───────────────┴────────────────┴──────> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    CaptureStarting,
    Streaming,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Created, CaptureStarting)
                | (Created, Stopping)
                | (CaptureStarting, Streaming)
                | (CaptureStarting, Stopping)
                | (Streaming, Stopping)
                | (Stopping, Stopped)
                | (Created | CaptureStarting | Streaming | Stopping, Failed)
        )
    }

    /// Validate `self -> next`
    pub fn transition(self, next: SessionState) -> Result<SessionState, SessionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else if self.is_terminal() {
            Err(SessionError::SessionClosed)
        } else {
            Err(SessionError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::CaptureStarting => "capture_starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left the running states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// Explicit stop from the supervisor or the handle
    StopRequested,
    /// The OS revoked the capture grant
    CaptureRevoked,
    /// Session handle dropped with the session still running
    HandleDropped,
    Capture(CaptureError),
    Engine(EngineInitError),
    Connection(ConnectionError),
    /// The engine could not provide an encoder for the track
    Encoder(String),
}

impl TerminalReason {
    /// Whether the reason carries an error rather than a normal stop
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TerminalReason::Capture(_)
                | TerminalReason::Engine(_)
                | TerminalReason::Connection(_)
                | TerminalReason::Encoder(_)
        )
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::StopRequested => write!(f, "stop requested"),
            TerminalReason::CaptureRevoked => write!(f, "{}", CaptureError::CaptureRevoked),
            TerminalReason::HandleDropped => write!(f, "session handle dropped"),
            TerminalReason::Capture(e) => write!(f, "{}", e),
            TerminalReason::Engine(e) => write!(f, "{}", e),
            TerminalReason::Connection(e) => write!(f, "{}", e),
            TerminalReason::Encoder(e) => write!(f, "Encoder unavailable: {}", e),
        }
    }
}

impl From<CaptureError> for TerminalReason {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::CaptureRevoked => TerminalReason::CaptureRevoked,
            other => TerminalReason::Capture(other),
        }
    }
}

impl From<EngineInitError> for TerminalReason {
    fn from(e: EngineInitError) -> Self {
        TerminalReason::Engine(e)
    }
}

impl From<ConnectionError> for TerminalReason {
    fn from(e: ConnectionError) -> Self {
        TerminalReason::Connection(e)
    }
}

/// Snapshot published on the session's watch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub reason: Option<TerminalReason>,
}

impl SessionStatus {
    pub fn created() -> Self {
        Self {
            state: SessionState::Created,
            reason: None,
        }
    }
}

/// Resources released during teardown, in release order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionResource {
    PeerConnection,
    VideoTrack,
    CapturePipeline,
    EngineHandle,
}

impl fmt::Display for SessionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionResource::PeerConnection => write!(f, "peer connection"),
            SessionResource::VideoTrack => write!(f, "video track"),
            SessionResource::CapturePipeline => write!(f, "capture pipeline"),
            SessionResource::EngineHandle => write!(f, "engine handle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::signaling::ConnectionState;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = SessionState::Created;
        for next in [
            SessionState::CaptureStarting,
            SessionState::Streaming,
            SessionState::Stopping,
            SessionState::Stopped,
        ] {
            state = state.transition(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for state in [
            SessionState::Created,
            SessionState::CaptureStarting,
            SessionState::Streaming,
            SessionState::Stopping,
        ] {
            assert!(state.can_transition_to(SessionState::Failed), "{}", state);
        }
        assert!(!SessionState::Stopped.can_transition_to(SessionState::Failed));
    }

    #[test]
    fn test_rejected_transitions() {
        assert_eq!(
            SessionState::Created.transition(SessionState::Streaming),
            Err(SessionError::InvalidTransition {
                from: SessionState::Created,
                to: SessionState::Streaming,
            })
        );
        assert_eq!(
            SessionState::Stopped.transition(SessionState::Stopping),
            Err(SessionError::SessionClosed)
        );
        assert_eq!(
            SessionState::Failed.transition(SessionState::CaptureStarting),
            Err(SessionError::SessionClosed)
        );
    }

    #[test]
    fn test_reason_classification() {
        assert!(!TerminalReason::StopRequested.is_error());
        assert!(!TerminalReason::from(CaptureError::CaptureRevoked).is_error());
        assert!(TerminalReason::from(CaptureError::TokenInvalid).is_error());

        let reason = TerminalReason::from(ConnectionError::Disconnected {
            state: ConnectionState::Failed,
            grace_ms: 50,
        });
        assert!(reason.is_error());
        assert_eq!(reason.to_string(), "Peer connection failed for longer than 50ms");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::CaptureStarting.to_string(), "capture_starting");
    }
}
