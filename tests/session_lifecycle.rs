//! End-to-end session lifecycle against real webrtc-rs peer connections and
//! the synthetic capturer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use streamcaster::error::{CaptureError, ConnectionError, EngineInitError, SessionError};
use streamcaster::AppError;
use streamcaster::events::{EventBus, SystemEvent};
use streamcaster::session::{
    PeerSessionConfig, SessionHandle, SessionResource, SessionState, SessionSupervisor,
    TerminalReason,
};
use streamcaster::video::{
    CaptureParams, CaptureToken, CapturerFactory, EncoderFactory, GrantState, ScreenCapturer,
    SyntheticCapturerFactory, VideoCodec, VideoEncoder,
};
use streamcaster::webrtc::engine::{EngineConfig, EngineFactory, EngineResources};
use streamcaster::webrtc::{
    ConnectionState, IceServer, IceServerConfig, MediaEngine, WebRtcEngineFactory,
};

struct Harness {
    supervisor: SessionSupervisor,
    engine: Arc<MediaEngine>,
    events: broadcast::Receiver<SystemEvent>,
}

impl Harness {
    fn new(capturers: Arc<dyn CapturerFactory>) -> Self {
        Self::with_engine(
            MediaEngine::webrtc(EngineConfig {
                mdns_mode: "disabled".to_string(),
            }),
            capturers,
        )
    }

    fn with_engine(engine: Arc<MediaEngine>, capturers: Arc<dyn CapturerFactory>) -> Self {
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        Self {
            supervisor: SessionSupervisor::new(engine.clone(), capturers, bus),
            engine,
            events,
        }
    }

    /// Drain everything published so far
    fn drain(&mut self) -> Vec<SystemEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn config() -> PeerSessionConfig {
    PeerSessionConfig {
        capture: CaptureParams::new(320, 180, 30),
        ice_servers: IceServerConfig::empty(),
        candidate_gather_wait: Duration::from_millis(10),
        disconnect_grace: Duration::from_millis(50),
        ..Default::default()
    }
}

fn states(events: &[SystemEvent], session: &SessionHandle) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            SystemEvent::SessionStateChanged {
                session_id, state, ..
            } if session_id == session.id() => Some(*state),
            _ => None,
        })
        .collect()
}

fn releases(events: &[SystemEvent]) -> Vec<SessionResource> {
    events
        .iter()
        .filter_map(|event| match event {
            SystemEvent::SessionResourceReleased { resource, .. } => Some(*resource),
            _ => None,
        })
        .collect()
}

const FULL_TEARDOWN: [SessionResource; 4] = [
    SessionResource::PeerConnection,
    SessionResource::VideoTrack,
    SessionResource::CapturePipeline,
    SessionResource::EngineHandle,
];

#[tokio::test]
async fn test_happy_path_state_sequence() {
    let capturers = Arc::new(SyntheticCapturerFactory::new());
    let mut h = Harness::new(capturers.clone());
    let (token, grant) = CaptureToken::issue("display-0");

    let session = h.supervisor.begin(token, config()).await.unwrap();
    assert_eq!(
        states(&h.drain(), &session),
        vec![
            SessionState::Created,
            SessionState::CaptureStarting,
            SessionState::Streaming
        ]
    );
    assert_eq!(h.engine.ref_count(), 1);

    // Captured access units reach the track without encode errors
    let track = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let info = session.info().await.unwrap();
            if let Some(track) = info.track.filter(|t| t.frames_sent >= 3) {
                break track;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(track.errors, 0);

    let status = session.stop().await;
    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(status.reason, Some(TerminalReason::StopRequested));

    let events = h.drain();
    assert_eq!(
        states(&events, &session),
        vec![SessionState::Stopping, SessionState::Stopped]
    );
    assert_eq!(releases(&events), FULL_TEARDOWN);
    assert_eq!(h.engine.ref_count(), 0);
    assert_eq!(capturers.live(), 0);
    assert_eq!(grant.state(), GrantState::Released);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_is_idempotent() {
    let mut h = Harness::new(Arc::new(SyntheticCapturerFactory::new()));
    let (token, _grant) = CaptureToken::issue("display-0");
    let session = h.supervisor.begin(token, config()).await.unwrap();
    h.drain();

    let stops: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.stop().await })
        })
        .collect();
    for stop in stops {
        assert_eq!(stop.await.unwrap().state, SessionState::Stopped);
    }
    // Once more after the actor is gone
    assert_eq!(session.stop().await.state, SessionState::Stopped);
    h.supervisor.request_stop().await;

    let events = h.drain();
    assert_eq!(
        states(&events, &session),
        vec![SessionState::Stopping, SessionState::Stopped]
    );
    assert_eq!(releases(&events), FULL_TEARDOWN);
}

#[tokio::test]
async fn test_consumed_token_fails_without_leaking() {
    let capturers = Arc::new(SyntheticCapturerFactory::new());
    let mut h = Harness::new(capturers.clone());
    let (token, _grant) = CaptureToken::issue("display-0");
    token.consume().unwrap();

    let session = h.supervisor.begin(token, config()).await.unwrap();
    let status = session.status();
    assert_eq!(status.state, SessionState::Failed);
    assert_eq!(
        status.reason,
        Some(TerminalReason::Capture(CaptureError::TokenInvalid))
    );

    assert_eq!(h.engine.ref_count(), 0);
    assert!(!h.engine.is_initialized());
    assert_eq!(capturers.created(), 0);

    let events = h.drain();
    assert_eq!(
        states(&events, &session),
        vec![
            SessionState::Created,
            SessionState::CaptureStarting,
            SessionState::Failed
        ]
    );
    assert_eq!(releases(&events), vec![SessionResource::EngineHandle]);
}

struct BrokenEngine;

struct NoEncoders;

impl EncoderFactory for NoEncoders {
    fn create(
        &self,
        codec: VideoCodec,
        _: CaptureParams,
    ) -> streamcaster::Result<Box<dyn VideoEncoder>> {
        Err(AppError::Encoder(format!("no {} encoder available", codec)))
    }

    fn supported_codecs(&self) -> Vec<VideoCodec> {
        vec![]
    }
}

impl EngineFactory for BrokenEngine {
    fn build(&self, _: &EngineConfig) -> Result<EngineResources, EngineInitError> {
        Err(EngineInitError::Context("render context unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_engine_failure_is_session_local() {
    let engine = MediaEngine::new(BrokenEngine, EngineConfig::default());
    let h = Harness::with_engine(engine.clone(), Arc::new(SyntheticCapturerFactory::new()));

    for _ in 0..2 {
        let (token, grant) = CaptureToken::issue("display-0");
        let session = h.supervisor.begin(token, config()).await.unwrap();
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(
            session.status().reason,
            Some(TerminalReason::Engine(EngineInitError::Context(_)))
        ));
        assert_eq!(grant.state(), GrantState::Granted);
    }
    assert_eq!(engine.ref_count(), 0);
}

#[tokio::test]
async fn test_connection_failure_rolls_back_track_and_capture() {
    let capturers = Arc::new(SyntheticCapturerFactory::new());
    let mut h = Harness::new(capturers.clone());
    let (token, grant) = CaptureToken::issue("display-0");
    let mut cfg = config();
    cfg.ice_servers = IceServerConfig::new(vec![IceServer::stun("http://bad")]);

    let session = h.supervisor.begin(token, cfg).await.unwrap();
    let status = session.status();
    assert_eq!(status.state, SessionState::Failed);
    assert!(matches!(
        status.reason,
        Some(TerminalReason::Connection(ConnectionError::Create(_)))
    ));

    let events = h.drain();
    assert_eq!(
        releases(&events),
        vec![
            SessionResource::VideoTrack,
            SessionResource::CapturePipeline,
            SessionResource::EngineHandle
        ]
    );
    assert_eq!(h.engine.ref_count(), 0);
    assert_eq!(capturers.live(), 0);
    assert_eq!(grant.state(), GrantState::Released);
}

#[tokio::test]
async fn test_encoder_failure_rolls_back_capture() {
    let capturers = Arc::new(SyntheticCapturerFactory::new());
    let engine = MediaEngine::new(
        WebRtcEngineFactory::with_encoders(Arc::new(NoEncoders)),
        EngineConfig {
            mdns_mode: "disabled".to_string(),
        },
    );
    let mut h = Harness::with_engine(engine, capturers.clone());
    let (token, _grant) = CaptureToken::issue("display-0");

    let session = h.supervisor.begin(token, config()).await.unwrap();
    let status = session.status();
    assert_eq!(status.state, SessionState::Failed);
    match status.reason {
        Some(TerminalReason::Encoder(message)) => assert!(message.contains("no H.264 encoder")),
        other => panic!("unexpected reason {:?}", other),
    }

    assert_eq!(
        releases(&h.drain()),
        vec![SessionResource::CapturePipeline, SessionResource::EngineHandle]
    );
    assert_eq!(h.engine.ref_count(), 0);
    assert_eq!(capturers.live(), 0);
}

#[tokio::test]
async fn test_host_revocation_stops_session() {
    let capturers = Arc::new(SyntheticCapturerFactory::new());
    let mut h = Harness::new(capturers.clone());
    let (token, grant) = CaptureToken::issue("display-0");
    let token_id = token.id();

    let session = h.supervisor.begin(token, config()).await.unwrap();
    h.supervisor.notify_capture_revoked().await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), session.wait_terminal())
        .await
        .unwrap();
    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(status.reason, Some(TerminalReason::CaptureRevoked));
    assert_eq!(grant.state(), GrantState::Revoked);
    assert_eq!(capturers.live(), 0);
    assert_eq!(h.engine.ref_count(), 0);

    let events = h.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, SystemEvent::CaptureRevoked { token_id: id } if *id == token_id)));
    assert_eq!(releases(&events), FULL_TEARDOWN);
}

#[tokio::test]
async fn test_os_revocation_from_capturer_stops_session() {
    let capturers = Arc::new(SyntheticCapturerFactory::new().revoke_after(3));
    let h = Harness::new(capturers.clone());
    let (token, _grant) = CaptureToken::issue("display-0");

    let session = h.supervisor.begin(token, config()).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), session.wait_terminal())
        .await
        .unwrap();

    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(status.reason, Some(TerminalReason::CaptureRevoked));
    assert_eq!(h.engine.ref_count(), 0);
}

#[tokio::test]
async fn test_second_begin_rejected() {
    let mut h = Harness::new(Arc::new(SyntheticCapturerFactory::new()));
    let (first, _g1) = CaptureToken::issue("display-0");
    let (second, g2) = CaptureToken::issue("display-1");

    let session = h.supervisor.begin(first, config()).await.unwrap();
    h.drain();

    let err = h.supervisor.begin(second, config()).await.unwrap_err();
    assert_eq!(err, SessionError::AlreadyActive);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(g2.state(), GrantState::Granted);
    assert!(h.drain().is_empty());
    assert_eq!(h.engine.ref_count(), 1);

    session.stop().await;
}

#[tokio::test]
async fn test_disconnect_beyond_grace_stops_session() {
    let mut h = Harness::new(Arc::new(SyntheticCapturerFactory::new()));
    let (token, _grant) = CaptureToken::issue("display-0");
    let session = h.supervisor.begin(token, config()).await.unwrap();

    session
        .notify_connection_state(ConnectionState::Disconnected)
        .await
        .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), session.wait_terminal())
        .await
        .unwrap();
    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(
        status.reason,
        Some(TerminalReason::Connection(ConnectionError::Disconnected {
            state: ConnectionState::Disconnected,
            grace_ms: 50,
        }))
    );

    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        SystemEvent::SessionConnectionState {
            state: ConnectionState::Disconnected,
            ..
        }
    )));
    assert_eq!(releases(&events), FULL_TEARDOWN);
}

#[tokio::test]
async fn test_recovery_within_grace_keeps_streaming() {
    let h = Harness::new(Arc::new(SyntheticCapturerFactory::new()));
    let (token, _grant) = CaptureToken::issue("display-0");
    let mut cfg = config();
    cfg.disconnect_grace = Duration::from_millis(300);
    let session = h.supervisor.begin(token, cfg).await.unwrap();

    session
        .notify_connection_state(ConnectionState::Failed)
        .await
        .unwrap();
    session
        .notify_connection_state(ConnectionState::Connected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), SessionState::Streaming);

    session.stop().await;
}

/// Capturer factory that takes a while to bind the grant
struct SlowCapturers {
    inner: SyntheticCapturerFactory,
    delay: Duration,
}

impl CapturerFactory for SlowCapturers {
    fn create(&self, token: &CaptureToken) -> Result<Box<dyn ScreenCapturer>, CaptureError> {
        std::thread::sleep(self.delay);
        self.inner.create(token)
    }
}

#[tokio::test]
async fn test_slow_capturer_does_not_stall_runtime() {
    let h = Harness::new(Arc::new(SlowCapturers {
        inner: SyntheticCapturerFactory::new(),
        delay: Duration::from_millis(300),
    }));
    let (token, _grant) = CaptureToken::issue("display-0");

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let session = h.supervisor.begin(token, config()).await.unwrap();
    ticker.abort();
    assert_eq!(session.state(), SessionState::Streaming);
    assert!(ticks.load(Ordering::SeqCst) >= 10);

    session.stop().await;
}

#[tokio::test]
async fn test_stop_interrupts_startup() {
    let mut harness = Harness::new(Arc::new(SlowCapturers {
        inner: SyntheticCapturerFactory::new(),
        delay: Duration::from_millis(300),
    }));
    let mut events = harness.events.resubscribe();
    harness.drain();
    let h = Arc::new(harness);
    let (token, grant) = CaptureToken::issue("display-0");

    let begin = {
        let h = h.clone();
        tokio::spawn(async move { h.supervisor.begin(token, config()).await })
    };

    // Wait until the session is mid-startup
    let session = loop {
        if let Some(session) = h.supervisor.active().await {
            if session.state() == SessionState::CaptureStarting {
                break session;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    let status = session.stop().await;
    assert_eq!(status.state, SessionState::Stopped);
    assert_eq!(status.reason, Some(TerminalReason::StopRequested));
    assert!(begin.await.unwrap().is_ok());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        states(&seen, &session),
        vec![
            SessionState::Created,
            SessionState::CaptureStarting,
            SessionState::Stopping,
            SessionState::Stopped
        ]
    );
    assert_eq!(h.engine.ref_count(), 0);
    assert_eq!(grant.state(), GrantState::Released);
}
