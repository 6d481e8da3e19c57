//! Peer session actor
//!
//! A session owns one capture pipeline, one video track, one peer connection
//! and one media engine handle. All transitions run on a single actor task;
//! host callbacks, capture revocation and peer connection state changes are
//! funnelled into it as messages, so concurrent triggers are serialized and
//! exactly one of them wins.
//!
//! Startup acquires in order: engine handle, capture pipeline, video track,
//! peer connection. Teardown releases in the opposite order, with the peer
//! connection closed before the track and the pipeline:
//!
//! ```text
//! PeerConnection -> VideoTrack -> CapturePipeline (blocking) -> EngineHandle
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{SessionResource, SessionState, SessionStatus, TerminalReason};
use crate::error::{AppError, CaptureError, ConnectionError, Result, SessionError};
use crate::events::{EventBus, SystemEvent};
use crate::video::capture::{CaptureEvent, CapturePipeline, CaptureStats, DEFAULT_FRAME_CAPACITY};
use crate::video::capturer::CapturerFactory;
use crate::video::format::CaptureParams;
use crate::video::token::{CaptureToken, GrantHandle};
use crate::webrtc::config::IceServerConfig;
use crate::webrtc::engine::{EngineHandle, MediaEngine};
use crate::webrtc::peer::{PeerEvent, PeerLink};
use crate::webrtc::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use crate::webrtc::track::{ScreenVideoTrack, VideoTrackConfig, VideoTrackStats};

/// Per-session settings, fixed at creation
#[derive(Debug, Clone)]
pub struct PeerSessionConfig {
    pub capture: CaptureParams,
    pub frame_capacity: usize,
    pub ice_servers: IceServerConfig,
    pub track: VideoTrackConfig,
    /// How long signaling calls wait for local ICE candidates
    pub candidate_gather_wait: Duration,
    /// How long the peer may stay disconnected or failed before teardown
    pub disconnect_grace: Duration,
    pub command_capacity: usize,
}

impl Default for PeerSessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureParams::default(),
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            ice_servers: IceServerConfig::default(),
            track: VideoTrackConfig::default(),
            candidate_gather_wait: Duration::from_millis(100),
            disconnect_grace: Duration::from_secs(5),
            command_capacity: 32,
        }
    }
}

/// Point-in-time session summary
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub state: SessionState,
    pub reason: Option<String>,
    pub connection_state: Option<ConnectionState>,
    pub capture: Option<CaptureStats>,
    pub track: Option<VideoTrackStats>,
    pub created_at: DateTime<Utc>,
    pub streaming_since: Option<DateTime<Utc>>,
}

enum Command {
    Start {
        reply: oneshot::Sender<SessionStatus>,
    },
    Stop,
    CaptureRevoked,
    ConnectionState(ConnectionState),
    CreateOffer {
        reply: oneshot::Sender<Result<SdpOffer>>,
    },
    HandleOffer {
        offer: SdpOffer,
        reply: oneshot::Sender<Result<SdpAnswer>>,
    },
    ApplyAnswer {
        answer: SdpAnswer,
        reply: oneshot::Sender<Result<()>>,
    },
    AddIceCandidate {
        candidate: IceCandidate,
        reply: oneshot::Sender<Result<()>>,
    },
    LocalCandidates {
        reply: oneshot::Sender<Result<Vec<IceCandidate>>>,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
}

/// Resources held by a session, in acquisition order
#[derive(Default)]
struct Resources {
    engine: Option<EngineHandle>,
    pipeline: Option<CapturePipeline>,
    track: Option<ScreenVideoTrack>,
    peer: Option<PeerLink>,
}

/// Host-facing handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch every state change of this session
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Run the startup sequence; resolves once the session is `Streaming`
    /// or has rolled back to a terminal state
    pub async fn start(&self) -> std::result::Result<SessionStatus, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Request teardown without waiting for it
    ///
    /// Interrupts an in-flight startup at the next step boundary. Repeated
    /// calls are no-ops.
    pub async fn request_stop(&self) {
        self.cancel.cancel();
        if self.commands.send(Command::Stop).await.is_err() {
            debug!("Session {} already closed", self.id);
        }
    }

    /// Stop and wait for the terminal state
    pub async fn stop(&self) -> SessionStatus {
        self.request_stop().await;
        self.wait_terminal().await
    }

    /// Wait until the session reaches `Stopped` or `Failed`
    pub async fn wait_terminal(&self) -> SessionStatus {
        let mut status = self.status.clone();
        let result = status.wait_for(|s| s.state.is_terminal()).await;
        match result {
            Ok(status) => status.clone(),
            // Actor gone; the last published value is final
            Err(_) => self.status.borrow().clone(),
        }
    }

    /// Forward an OS capture revocation notice
    pub async fn notify_capture_revoked(&self) -> std::result::Result<(), SessionError> {
        self.send(Command::CaptureRevoked).await
    }

    /// Forward a connection state change observed by the host
    pub async fn notify_connection_state(
        &self,
        state: ConnectionState,
    ) -> std::result::Result<(), SessionError> {
        self.send(Command::ConnectionState(state)).await
    }

    pub async fn create_offer(&self) -> Result<SdpOffer> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::CreateOffer { reply }, rx).await
    }

    pub async fn handle_offer(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::HandleOffer { offer, reply }, rx).await
    }

    pub async fn apply_answer(&self, answer: SdpAnswer) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ApplyAnswer { answer, reply }, rx).await
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::AddIceCandidate { candidate, reply }, rx)
            .await
    }

    pub async fn local_candidates(&self) -> Result<Vec<IceCandidate>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::LocalCandidates { reply }, rx).await
    }

    pub async fn info(&self) -> std::result::Result<SessionInfo, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Info { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    async fn send(&self, command: Command) -> std::result::Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.send(command).await?;
        rx.await.map_err(|_| AppError::Session(SessionError::SessionClosed))?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Screen sharing session
pub struct PeerSession {
    id: String,
    config: PeerSessionConfig,
    engine: Arc<MediaEngine>,
    capturers: Arc<dyn CapturerFactory>,
    events: Arc<EventBus>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    token: Option<CaptureToken>,
    grant: GrantHandle,
    resources: Resources,
    connection_state: Option<ConnectionState>,
    grace_deadline: Option<Instant>,
    created_at: DateTime<Utc>,
    streaming_since: Option<DateTime<Utc>>,
}

impl PeerSession {
    /// Create a session in `Created` and spawn its actor task
    pub fn spawn(
        token: CaptureToken,
        config: PeerSessionConfig,
        engine: Arc<MediaEngine>,
        capturers: Arc<dyn CapturerFactory>,
        events: Arc<EventBus>,
    ) -> SessionHandle {
        let id = Uuid::new_v4().to_string();
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(SessionStatus::created());
        let cancel = CancellationToken::new();

        let session = PeerSession {
            id: id.clone(),
            config,
            engine,
            capturers,
            events,
            status: status_tx,
            cancel: cancel.clone(),
            grant: token.handle(),
            token: Some(token),
            resources: Resources::default(),
            connection_state: None,
            grace_deadline: None,
            created_at: Utc::now(),
            streaming_since: None,
        };

        info!("Session {} created", id);
        session.publish_state(SessionState::Created, None);
        tokio::spawn(session.run(commands_rx));

        SessionHandle {
            id,
            commands: commands_tx,
            status: status_rx,
            cancel,
        }
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &capture_tx, &peer_tx).await,
                    None => {
                        if !self.state().is_terminal() {
                            warn!("All handles to session {} dropped, stopping", self.id);
                        }
                        self.shutdown(TerminalReason::HandleDropped).await;
                    }
                },

                Some(event) = capture_rx.recv() => match event {
                    CaptureEvent::Revoked { token_id } => {
                        debug!("Session {} observed revocation of {}", self.id, token_id);
                        self.on_capture_revoked().await;
                    }
                },

                Some(event) = peer_rx.recv() => match event {
                    PeerEvent::ConnectionState(state) => self.on_connection_state(state),
                    PeerEvent::LocalCandidate(candidate) => {
                        self.events.publish(SystemEvent::SessionIceCandidate {
                            session_id: self.id.clone(),
                            candidate,
                        });
                    }
                },

                _ = grace_elapsed(self.grace_deadline) => self.on_grace_expired().await,
            }

            if self.state().is_terminal() {
                break;
            }
        }

        debug!("Session {} actor exiting", self.id);
    }

    async fn handle_command(
        &mut self,
        command: Command,
        capture_tx: &mpsc::UnboundedSender<CaptureEvent>,
        peer_tx: &mpsc::UnboundedSender<PeerEvent>,
    ) {
        match command {
            Command::Start { reply } => {
                self.start(capture_tx, peer_tx).await;
                let _ = reply.send(self.status.borrow().clone());
            }
            Command::Stop => self.shutdown(TerminalReason::StopRequested).await,
            Command::CaptureRevoked => {
                if self.grant.revoke() {
                    info!("Session {}: host reported capture revocation", self.id);
                }
                self.on_capture_revoked().await;
            }
            Command::ConnectionState(state) => self.on_connection_state(state),
            Command::CreateOffer { reply } => {
                let result = match self.streaming_peer() {
                    Ok(peer) => peer.create_offer().await.map_err(AppError::from),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::HandleOffer { offer, reply } => {
                let result = match self.streaming_peer() {
                    Ok(peer) => peer.handle_offer(offer).await.map_err(AppError::from),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::ApplyAnswer { answer, reply } => {
                let result = match self.streaming_peer() {
                    Ok(peer) => peer.apply_answer(answer).await.map_err(AppError::from),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::AddIceCandidate { candidate, reply } => {
                let result = match self.streaming_peer() {
                    Ok(peer) => peer
                        .add_ice_candidate(candidate)
                        .await
                        .map_err(AppError::from),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::LocalCandidates { reply } => {
                let result = match self.streaming_peer() {
                    Ok(peer) => Ok(peer.local_candidates().await),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Command::Info { reply } => {
                let _ = reply.send(self.info());
            }
        }
    }

    /// Peer connection, when signaling is legal
    fn streaming_peer(&self) -> std::result::Result<&PeerLink, SessionError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(SessionError::SessionClosed);
        }
        match (&self.resources.peer, state) {
            (Some(peer), SessionState::Streaming) => Ok(peer),
            _ => Err(SessionError::InvalidTransition {
                from: state,
                to: SessionState::Streaming,
            }),
        }
    }

    async fn start(
        &mut self,
        capture_tx: &mpsc::UnboundedSender<CaptureEvent>,
        peer_tx: &mpsc::UnboundedSender<PeerEvent>,
    ) {
        if let Err(e) = self.transition(SessionState::CaptureStarting, None) {
            warn!("Session {} cannot start: {}", self.id, e);
            return;
        }

        match self.acquire_all(capture_tx, peer_tx).await {
            Ok(()) => {
                self.streaming_since = Some(Utc::now());
                let _ = self.transition(SessionState::Streaming, None);
            }
            Err(TerminalReason::StopRequested) => {
                info!("Session {} stopped during startup", self.id);
                self.shutdown(TerminalReason::StopRequested).await;
            }
            Err(reason) => {
                error!("Session {} failed to start: {}", self.id, reason);
                self.release_all().await;
                let _ = self.transition(SessionState::Failed, Some(reason));
            }
        }
    }

    fn check_cancelled(&self) -> std::result::Result<(), TerminalReason> {
        if self.cancel.is_cancelled() {
            Err(TerminalReason::StopRequested)
        } else {
            Ok(())
        }
    }

    async fn acquire_all(
        &mut self,
        capture_tx: &mpsc::UnboundedSender<CaptureEvent>,
        peer_tx: &mpsc::UnboundedSender<PeerEvent>,
    ) -> std::result::Result<(), TerminalReason> {
        let engine = self.engine.acquire()?;
        let encoders = engine
            .resources()
            .map(|r| r.encoders().clone())
            .ok_or_else(|| TerminalReason::Encoder("engine released".to_string()))?;
        self.resources.engine = Some(engine);
        self.check_cancelled()?;

        let token = self
            .token
            .take()
            .ok_or(TerminalReason::Capture(CaptureError::TokenInvalid))?;
        let params = self.config.capture;
        let mut pipeline = CapturePipeline::new(
            self.capturers.clone(),
            capture_tx.clone(),
            self.config.frame_capacity,
        );
        // Native capturer setup may block
        let (pipeline, started) = tokio::task::spawn_blocking(move || {
            let started = pipeline.start(
                token,
                params.resolution.width,
                params.resolution.height,
                params.fps,
            );
            (pipeline, started)
        })
        .await
        .map_err(|e| {
            CaptureError::InitFailed(format!("capture start task failed: {}", e))
        })?;
        started?;
        let frames = pipeline.subscribe();
        self.resources.pipeline = Some(pipeline);
        self.check_cancelled()?;

        let encoder = encoders
            .create(self.config.track.codec, params)
            .map_err(|e| TerminalReason::Encoder(e.to_string()))?;
        let track = ScreenVideoTrack::new(self.config.track.clone());
        let track_local = track.as_track_local();
        self.resources.track = Some(track);
        self.check_cancelled()?;

        let Some(engine) = self.resources.engine.as_ref() else {
            return Err(TerminalReason::Encoder("engine released".to_string()));
        };
        let peer = PeerLink::connect(
            engine,
            &self.config.ice_servers,
            self.id.clone(),
            self.config.candidate_gather_wait,
            peer_tx.clone(),
        )
        .await?;
        let attached = peer.add_track(track_local).await;
        self.resources.peer = Some(peer);
        attached?;
        self.check_cancelled()?;

        if let Some(track) = self.resources.track.as_mut() {
            track.start_sending(frames, encoder);
        }
        Ok(())
    }

    /// Release everything held, in reverse acquisition order
    async fn release_all(&mut self) {
        if let Some(track) = self.resources.track.as_ref() {
            track.stop();
        }

        if let Some(peer) = self.resources.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Session {}: {}", self.id, e);
            }
            self.released(SessionResource::PeerConnection);
        }

        if let Some(mut track) = self.resources.track.take() {
            track.close().await;
            self.released(SessionResource::VideoTrack);
        }

        if let Some(mut pipeline) = self.resources.pipeline.take() {
            let stopped = tokio::task::spawn_blocking(move || pipeline.stop()).await;
            match stopped {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Session {}: capture stop failed: {}", self.id, e),
                Err(e) => error!("Session {}: capture stop task failed: {}", self.id, e),
            }
            self.released(SessionResource::CapturePipeline);
        }

        if let Some(engine) = self.resources.engine.take() {
            engine.release();
            self.released(SessionResource::EngineHandle);
        }
    }

    fn released(&self, resource: SessionResource) {
        debug!("Session {} released {}", self.id, resource);
        self.events.publish(SystemEvent::SessionResourceReleased {
            session_id: self.id.clone(),
            resource,
        });
    }

    /// Common teardown for every stop trigger; no-op once stopping
    async fn shutdown(&mut self, reason: TerminalReason) {
        let state = self.state();
        if state == SessionState::Stopping || state.is_terminal() {
            return;
        }

        self.cancel.cancel();
        self.grace_deadline = None;
        if self
            .transition(SessionState::Stopping, Some(reason.clone()))
            .is_err()
        {
            return;
        }
        self.release_all().await;
        let _ = self.transition(SessionState::Stopped, Some(reason));
    }

    async fn on_capture_revoked(&mut self) {
        let state = self.state();
        if state == SessionState::Stopping || state.is_terminal() {
            return;
        }

        self.events.publish(SystemEvent::CaptureRevoked {
            token_id: self.grant.token_id(),
        });
        warn!("Session {}: capture revoked by the system", self.id);
        self.shutdown(TerminalReason::CaptureRevoked).await;
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        if self.connection_state == Some(state) {
            return;
        }
        self.connection_state = Some(state);
        self.events.publish(SystemEvent::SessionConnectionState {
            session_id: self.id.clone(),
            state,
        });

        if self.state() != SessionState::Streaming {
            return;
        }

        if state.is_degraded() {
            if self.grace_deadline.is_none() {
                warn!(
                    "Session {} peer {}, stopping in {:?} unless it recovers",
                    self.id, state, self.config.disconnect_grace
                );
                self.grace_deadline = Some(Instant::now() + self.config.disconnect_grace);
            }
        } else if state == ConnectionState::Connected && self.grace_deadline.take().is_some() {
            info!("Session {} peer recovered", self.id);
        }
    }

    async fn on_grace_expired(&mut self) {
        self.grace_deadline = None;
        if self.state() != SessionState::Streaming {
            return;
        }

        let state = self.connection_state.unwrap_or(ConnectionState::Disconnected);
        let error = ConnectionError::Disconnected {
            state,
            grace_ms: self.config.disconnect_grace.as_millis() as u64,
        };
        warn!("Session {}: {}", self.id, error);
        self.shutdown(TerminalReason::Connection(error)).await;
    }

    fn transition(
        &mut self,
        next: SessionState,
        reason: Option<TerminalReason>,
    ) -> std::result::Result<(), SessionError> {
        let current = self.state();
        current.transition(next).inspect_err(|e| {
            warn!("Session {} rejected {} -> {}: {}", self.id, current, next, e);
        })?;

        info!("Session {}: {} -> {}", self.id, current, next);
        self.publish_state(next, reason);
        Ok(())
    }

    fn publish_state(&self, state: SessionState, reason: Option<TerminalReason>) {
        let detail = reason.as_ref().map(ToString::to_string);
        self.status.send_replace(SessionStatus { state, reason });
        self.events.publish(SystemEvent::SessionStateChanged {
            session_id: self.id.clone(),
            state,
            reason: detail,
            at: Utc::now(),
        });
    }

    fn info(&self) -> SessionInfo {
        let status = self.status.borrow().clone();
        SessionInfo {
            session_id: self.id.clone(),
            state: status.state,
            reason: status.reason.map(|r| r.to_string()),
            connection_state: self.connection_state,
            capture: self.resources.pipeline.as_ref().map(|p| p.stats()),
            track: self.resources.track.as_ref().map(|t| t.stats()),
            created_at: self.created_at,
            streaming_since: self.streaming_since,
        }
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineInitError;
    use crate::video::capturer::SyntheticCapturerFactory;
    use crate::video::token::GrantState;
    use crate::webrtc::engine::{EngineConfig, EngineFactory, EngineResources};

    fn test_config() -> PeerSessionConfig {
        PeerSessionConfig {
            capture: CaptureParams::new(320, 180, 30),
            ice_servers: IceServerConfig::empty(),
            candidate_gather_wait: Duration::from_millis(10),
            disconnect_grace: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn engine() -> Arc<MediaEngine> {
        MediaEngine::webrtc(EngineConfig {
            mdns_mode: "disabled".to_string(),
        })
    }

    fn spawn(
        token: CaptureToken,
        engine: Arc<MediaEngine>,
        capturers: Arc<SyntheticCapturerFactory>,
        events: Arc<EventBus>,
    ) -> SessionHandle {
        PeerSession::spawn(token, test_config(), engine, capturers, events)
    }

    struct BrokenEngine;

    impl EngineFactory for BrokenEngine {
        fn build(&self, _: &EngineConfig) -> std::result::Result<EngineResources, EngineInitError> {
            Err(EngineInitError::Context("no render device".to_string()))
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let engine = engine();
        let capturers = Arc::new(SyntheticCapturerFactory::new());
        let (token, grant) = CaptureToken::issue("grant");
        let session = spawn(token, engine.clone(), capturers.clone(), Arc::new(EventBus::new()));

        let status = session.start().await.unwrap();
        assert_eq!(status.state, SessionState::Streaming);
        assert_eq!(engine.ref_count(), 1);
        assert_eq!(capturers.live(), 1);
        assert_eq!(grant.state(), GrantState::Active);

        let status = session.stop().await;
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(status.reason, Some(TerminalReason::StopRequested));
        assert_eq!(engine.ref_count(), 0);
        assert_eq!(capturers.live(), 0);
        assert_eq!(grant.state(), GrantState::Released);
    }

    #[tokio::test]
    async fn test_engine_failure_fails_session() {
        let engine = MediaEngine::new(BrokenEngine, EngineConfig::default());
        let capturers = Arc::new(SyntheticCapturerFactory::new());
        let (token, grant) = CaptureToken::issue("grant");
        let session = spawn(token, engine.clone(), capturers.clone(), Arc::new(EventBus::new()));

        let status = session.start().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(matches!(status.reason, Some(TerminalReason::Engine(_))));
        assert_eq!(engine.ref_count(), 0);
        assert_eq!(capturers.created(), 0);
        // The token was never bound
        assert_eq!(grant.state(), GrantState::Granted);
    }

    #[tokio::test]
    async fn test_capture_failure_releases_engine() {
        let engine = engine();
        let capturers = Arc::new(SyntheticCapturerFactory::new().fail_start());
        let (token, grant) = CaptureToken::issue("grant");
        let session = spawn(token, engine.clone(), capturers.clone(), Arc::new(EventBus::new()));

        let status = session.start().await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(matches!(
            status.reason,
            Some(TerminalReason::Capture(CaptureError::InitFailed(_)))
        ));
        assert_eq!(engine.ref_count(), 0);
        assert!(!engine.is_initialized());
        assert_eq!(capturers.live(), 0);
        assert_eq!(grant.state(), GrantState::Released);
    }

    #[tokio::test]
    async fn test_signaling_rejected_outside_streaming() {
        let engine = engine();
        let (token, _grant) = CaptureToken::issue("grant");
        let session = spawn(
            token,
            engine,
            Arc::new(SyntheticCapturerFactory::new()),
            Arc::new(EventBus::new()),
        );

        // Still Created
        let err = session.local_candidates().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Session(SessionError::InvalidTransition {
                from: SessionState::Created,
                to: SessionState::Streaming,
            })
        ));

        session.stop().await;
        let err = session.create_offer().await.unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::SessionClosed)));
        assert_eq!(session.start().await, Err(SessionError::SessionClosed));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let engine = engine();
        let (token, grant) = CaptureToken::issue("grant");
        let session = spawn(
            token,
            engine.clone(),
            Arc::new(SyntheticCapturerFactory::new()),
            Arc::new(EventBus::new()),
        );

        let status = session.stop().await;
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(engine.init_count(), 0);
        assert_eq!(grant.state(), GrantState::Granted);
    }

    #[tokio::test]
    async fn test_info_while_streaming() {
        let engine = engine();
        let (token, _grant) = CaptureToken::issue("grant");
        let session = spawn(
            token,
            engine,
            Arc::new(SyntheticCapturerFactory::new()),
            Arc::new(EventBus::new()),
        );
        session.start().await.unwrap();

        let info = session.info().await.unwrap();
        assert_eq!(info.session_id, session.id());
        assert_eq!(info.state, SessionState::Streaming);
        assert!(info.capture.is_some());
        assert!(info.track.is_some());
        assert!(info.streaming_since.is_some());

        session.stop().await;
        assert_eq!(session.info().await.unwrap_err(), SessionError::SessionClosed);
    }
}
