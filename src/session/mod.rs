//! Screen sharing sessions
//!
//! [`SessionSupervisor`] admits one session at a time; each
//! [`PeerSession`] drives capture, encoding and the peer connection through
//! the [`SessionState`] machine.

pub mod peer_session;
pub mod state;
pub mod supervisor;

pub use peer_session::{PeerSession, PeerSessionConfig, SessionHandle, SessionInfo};
pub use state::{SessionResource, SessionState, SessionStatus, TerminalReason};
pub use supervisor::SessionSupervisor;
