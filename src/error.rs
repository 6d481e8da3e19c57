use thiserror::Error;

use crate::session::SessionState;
use crate::webrtc::signaling::ConnectionState;

/// Screen capture failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture token already consumed or revoked")]
    TokenInvalid,

    #[error("Capture already started")]
    AlreadyStarted,

    #[error("Capturer initialization failed: {0}")]
    InitFailed(String),

    #[error("Capture revoked by the system")]
    CaptureRevoked,
}

/// Media engine construction failure
///
/// Fatal to the requesting session only; the engine stays uninitialized
/// and the next `acquire()` retries from scratch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineInitError {
    #[error("Failed to build WebRTC API: {0}")]
    Api(String),

    #[error("Failed to create render context: {0}")]
    Context(String),
}

/// Peer connection failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Failed to create peer connection: {0}")]
    Create(String),

    #[error("Failed to attach video track: {0}")]
    AddTrack(String),

    #[error("Signaling failed: {0}")]
    Signaling(String),

    #[error("Peer connection {state} for longer than {grace_ms}ms")]
    Disconnected {
        state: ConnectionState,
        grace_ms: u64,
    },

    #[error("Failed to close peer connection: {0}")]
    Close(String),
}

/// Session lifecycle violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A screen sharing session is already active")]
    AlreadyActive,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Engine(#[from] EngineInitError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_convert() {
        let err: AppError = CaptureError::TokenInvalid.into();
        assert!(matches!(err, AppError::Capture(CaptureError::TokenInvalid)));

        let err: AppError = SessionError::SessionClosed.into();
        assert_eq!(err.to_string(), "Session is closed");
    }

    #[test]
    fn test_disconnected_message() {
        let err = ConnectionError::Disconnected {
            state: ConnectionState::Disconnected,
            grace_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Peer connection disconnected for longer than 5000ms"
        );
    }
}
