//! Capture pipeline
//!
//! Binds a capture token to a native capturer and fans captured frames out
//! over a broadcast channel. OS revocation of the grant is surfaced as an
//! asynchronous [`CaptureEvent::Revoked`].

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::capturer::{CaptureCounters, CapturerFactory, FrameSink, ScreenCapturer};
use super::format::CaptureParams;
use super::frame::VideoFrame;
use super::token::{CaptureToken, GrantState};
use crate::error::CaptureError;

/// Default frame channel capacity (small to keep latency low)
pub const DEFAULT_FRAME_CAPACITY: usize = 8;

/// Asynchronous notifications raised by a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The OS revoked the capture grant
    Revoked { token_id: Uuid },
}

/// Capture statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub current_fps: f32,
}

struct ActiveCapture {
    capturer: Box<dyn ScreenCapturer>,
    token: CaptureToken,
    params: CaptureParams,
    started_at: Instant,
    watcher: Option<tokio::task::JoinHandle<()>>,
}

/// Capturer + video source for one session
pub struct CapturePipeline {
    factory: Arc<dyn CapturerFactory>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    frame_tx: broadcast::Sender<VideoFrame>,
    counters: Arc<CaptureCounters>,
    active: Option<ActiveCapture>,
}

impl CapturePipeline {
    pub fn new(
        factory: Arc<dyn CapturerFactory>,
        events: mpsc::UnboundedSender<CaptureEvent>,
        frame_capacity: usize,
    ) -> Self {
        let (frame_tx, _) = broadcast::channel(frame_capacity.max(1));
        Self {
            factory,
            events,
            frame_tx,
            counters: Arc::new(CaptureCounters::default()),
            active: None,
        }
    }

    /// Bind `token` to a native capturer and begin frame delivery
    pub fn start(
        &mut self,
        token: CaptureToken,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        token.consume()?;

        let params = CaptureParams::new(width, height, fps);
        let mut capturer = match self.factory.create(&token) {
            Ok(capturer) => capturer,
            Err(e) => {
                token.release();
                return Err(e);
            }
        };

        let sink = FrameSink::new(self.frame_tx.clone(), self.counters.clone(), token.handle());
        if let Err(e) = capturer.start_capture(params, sink) {
            token.release();
            return Err(e);
        }

        let watcher = self.spawn_revocation_watcher(&token);
        info!(
            "Capture started: {} via {} (token {})",
            params,
            capturer.name(),
            token.id()
        );

        self.active = Some(ActiveCapture {
            capturer,
            token,
            params,
            started_at: Instant::now(),
            watcher,
        });
        Ok(())
    }

    /// Stop capture and release the token; no-op when not started
    ///
    /// Blocks until the capturer has drained its in-flight frame callbacks.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };

        if let Some(watcher) = active.watcher.take() {
            watcher.abort();
        }

        active.capturer.stop_capture();
        active.token.release();

        let stats = self.stats_since(active.started_at);
        info!(
            "Capture {} stopped (token {}): {} frames delivered, {} dropped",
            active.params,
            active.token.id(),
            stats.frames_delivered,
            stats.frames_dropped
        );
        Ok(())
    }

    /// Subscribe to captured frames
    pub fn subscribe(&self) -> broadcast::Receiver<VideoFrame> {
        self.frame_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        match &self.active {
            Some(active) => self.stats_since(active.started_at),
            None => self.stats_since(Instant::now()),
        }
    }

    fn stats_since(&self, started_at: Instant) -> CaptureStats {
        let delivered = self.counters.frames_delivered.load(Ordering::Relaxed);
        let dropped = self.counters.frames_dropped.load(Ordering::Relaxed);
        let elapsed = started_at.elapsed().as_secs_f32();
        CaptureStats {
            frames_delivered: delivered,
            frames_dropped: dropped,
            current_fps: if elapsed > 0.1 {
                (delivered + dropped) as f32 / elapsed
            } else {
                0.0
            },
        }
    }

    fn spawn_revocation_watcher(&self, token: &CaptureToken) -> Option<tokio::task::JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; capture revocation will not be reported");
            return None;
        };

        let mut grant_rx = token.handle().subscribe();
        let events = self.events.clone();
        let token_id = token.id();

        Some(runtime.spawn(async move {
            if grant_rx
                .wait_for(|state| *state == GrantState::Revoked)
                .await
                .is_ok()
            {
                debug!("Capture grant {} revoked", token_id);
                let _ = events.send(CaptureEvent::Revoked { token_id });
            }
        }))
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("Capture pipeline dropped while running, stopping");
            let _ = self.stop();
        }
    }
}
