//! Native screen capturer seam
//!
//! The OS capture backend is an external collaborator. It is reached through
//! [`CapturerFactory`] (binds a capture grant to a native capturer) and
//! [`ScreenCapturer`] (start/stop frame delivery). Capturers push frames and
//! revocation notices into a [`FrameSink`] from their own threads.
//!
//! [`SyntheticCapturerFactory`] is a test-pattern backend used by the host
//! binary and the test suite.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::format::{CaptureParams, PixelFormat};
use super::frame::VideoFrame;
use super::h264;
use super::token::{CaptureToken, GrantHandle};
use crate::error::CaptureError;

/// Frame counters shared between a capturer thread and its pipeline
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub frames_delivered: AtomicU64,
    pub frames_dropped: AtomicU64,
}

/// Delivery target handed to a running capturer
#[derive(Clone)]
pub struct FrameSink {
    tx: broadcast::Sender<VideoFrame>,
    counters: Arc<CaptureCounters>,
    grant: GrantHandle,
}

impl FrameSink {
    pub(crate) fn new(
        tx: broadcast::Sender<VideoFrame>,
        counters: Arc<CaptureCounters>,
        grant: GrantHandle,
    ) -> Self {
        Self {
            tx,
            counters,
            grant,
        }
    }

    /// Publish a frame; frames with no subscriber are counted as dropped
    pub fn deliver(&self, frame: VideoFrame) {
        if self.tx.send(frame).is_ok() {
            self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Report that the OS stopped capture on its own
    pub fn revoked(&self) {
        if self.grant.revoke() {
            info!("Capture grant {} revoked by capturer", self.grant.token_id());
        }
    }
}

/// A native capturer bound to one capture grant
pub trait ScreenCapturer: Send {
    /// Begin delivering frames into `sink`
    fn start_capture(&mut self, params: CaptureParams, sink: FrameSink) -> Result<(), CaptureError>;

    /// Stop delivery; returns only after in-flight frame callbacks drained
    fn stop_capture(&mut self);

    fn name(&self) -> &str;
}

/// Creates native capturers from capture tokens
pub trait CapturerFactory: Send + Sync {
    fn create(&self, token: &CaptureToken) -> Result<Box<dyn ScreenCapturer>, CaptureError>;
}

/// Test-pattern capturer backend
///
/// Delivers grey H.264 key frames on a dedicated thread, alternating two
/// precomputed access units. Failure modes can be switched on to exercise
/// error paths.
#[derive(Debug, Default)]
pub struct SyntheticCapturerFactory {
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    revoke_after_frames: AtomicU64,
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl SyntheticCapturerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create()` fail with `InitFailed`
    pub fn fail_create(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    /// Make `start_capture()` fail with `InitFailed`
    pub fn fail_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    /// Simulate the OS revoking the grant after `frames` frames
    pub fn revoke_after(self, frames: u64) -> Self {
        self.revoke_after_frames.store(frames, Ordering::SeqCst);
        self
    }

    /// Capturers created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Capturers currently delivering frames
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl CapturerFactory for SyntheticCapturerFactory {
    fn create(&self, token: &CaptureToken) -> Result<Box<dyn ScreenCapturer>, CaptureError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CaptureError::InitFailed(
                "synthetic capturer refused the grant".to_string(),
            ));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        debug!("Creating synthetic capturer for token {}", token.id());

        let revoke_after = self.revoke_after_frames.load(Ordering::SeqCst);
        Ok(Box::new(SyntheticCapturer {
            name: format!("synthetic-{}", &token.id().to_string()[..8]),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            revoke_after: (revoke_after > 0).then_some(revoke_after),
            live: self.live.clone(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

struct SyntheticCapturer {
    name: String,
    fail_start: bool,
    revoke_after: Option<u64>,
    live: Arc<AtomicUsize>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ScreenCapturer for SyntheticCapturer {
    fn start_capture(&mut self, params: CaptureParams, sink: FrameSink) -> Result<(), CaptureError> {
        if self.thread.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        if self.fail_start {
            return Err(CaptureError::InitFailed(format!(
                "{}: simulated start failure",
                self.name
            )));
        }
        if !params.resolution.is_valid() {
            return Err(CaptureError::InitFailed(format!(
                "unsupported resolution {}",
                params.resolution
            )));
        }

        let patterns = vec![
            h264::grey_access_unit(params.resolution, 0),
            h264::grey_access_unit(params.resolution, 1),
        ];
        let stop_flag = self.stop_flag.clone();
        let revoke_after = self.revoke_after;
        stop_flag.store(false, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || capture_loop(params, patterns, sink, stop_flag, revoke_after))
            .map_err(|e| CaptureError::InitFailed(format!("failed to spawn capture thread: {}", e)))?;

        self.thread = Some(handle);
        self.live.fetch_add(1, Ordering::SeqCst);
        info!("{} capturing at {}", self.name, params);
        Ok(())
    }

    fn stop_capture(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        self.stop_flag.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            warn!("{} capture thread panicked", self.name);
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!("{} stopped", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SyntheticCapturer {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

fn capture_loop(
    params: CaptureParams,
    patterns: Vec<Bytes>,
    sink: FrameSink,
    stop_flag: Arc<AtomicBool>,
    revoke_after: Option<u64>,
) {
    let interval = params.frame_interval();
    let tick = interval.min(Duration::from_millis(5));
    let mut sequence = 0u64;

    'capture: while !stop_flag.load(Ordering::Relaxed) {
        // Sleep in short ticks so stop requests are honoured quickly
        let mut waited = Duration::ZERO;
        while waited < interval {
            if stop_flag.load(Ordering::Relaxed) {
                break 'capture;
            }
            std::thread::sleep(tick);
            waited += tick;
        }

        let data = patterns[(sequence as usize) % patterns.len()].clone();
        sink.deliver(
            VideoFrame::new(data, params.resolution, PixelFormat::H264, sequence)
                .with_key_frame(true),
        );
        sequence += 1;

        if revoke_after.is_some_and(|limit| sequence >= limit) {
            sink.revoked();
            break;
        }
    }
}
