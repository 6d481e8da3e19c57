//! Session supervisor
//!
//! Enforces a single active screen sharing session per process and routes
//! host notifications to it.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::peer_session::{PeerSession, PeerSessionConfig, SessionHandle};
use crate::error::SessionError;
use crate::events::EventBus;
use crate::video::capturer::CapturerFactory;
use crate::video::token::CaptureToken;
use crate::webrtc::engine::MediaEngine;
use crate::webrtc::signaling::ConnectionState;

pub struct SessionSupervisor {
    engine: Arc<MediaEngine>,
    capturers: Arc<dyn CapturerFactory>,
    events: Arc<EventBus>,
    active: Mutex<Option<SessionHandle>>,
}

impl SessionSupervisor {
    pub fn new(
        engine: Arc<MediaEngine>,
        capturers: Arc<dyn CapturerFactory>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            engine,
            capturers,
            events,
            active: Mutex::new(None),
        }
    }

    /// Create and start a session for `token`
    ///
    /// Fails with `AlreadyActive` while another session is not yet
    /// `Stopped`/`Failed`; the existing session is left untouched. A session
    /// whose startup failed is still returned, in `Failed` with its reason.
    pub async fn begin(
        &self,
        token: CaptureToken,
        config: PeerSessionConfig,
    ) -> Result<SessionHandle, SessionError> {
        let handle = {
            let mut active = self.active.lock().await;
            if let Some(current) = active.as_ref() {
                if !current.is_terminal() {
                    warn!(
                        "Rejecting new session: {} is {}",
                        current.id(),
                        current.state()
                    );
                    return Err(SessionError::AlreadyActive);
                }
            }

            let handle = PeerSession::spawn(
                token,
                config,
                self.engine.clone(),
                self.capturers.clone(),
                self.events.clone(),
            );
            *active = Some(handle.clone());
            handle
        };

        let status = handle.start().await?;
        info!("Session {} began in state {}", handle.id(), status.state);
        Ok(handle)
    }

    /// Stop the active session, if any, and wait for its terminal state
    pub async fn request_stop(&self) {
        let Some(handle) = self.active().await else {
            return;
        };
        let status = handle.stop().await;
        info!("Session {} ended: {}", handle.id(), status.state);
    }

    /// Forward the host's capture revocation callback
    pub async fn notify_capture_revoked(&self) -> Result<(), SessionError> {
        match self.active().await {
            Some(handle) => handle.notify_capture_revoked().await,
            None => Err(SessionError::SessionClosed),
        }
    }

    /// Forward a connection state change reported by the host
    pub async fn notify_connection_state(&self, state: ConnectionState) -> Result<(), SessionError> {
        match self.active().await {
            Some(handle) => handle.notify_connection_state(state).await,
            None => Err(SessionError::SessionClosed),
        }
    }

    /// Current session, terminal or not
    pub async fn active(&self) -> Option<SessionHandle> {
        self.active.lock().await.clone()
    }

    pub fn engine(&self) -> &Arc<MediaEngine> {
        &self.engine
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}
