//! Screen video track
//!
//! Pulls frames from the capture pipeline, runs them through the session's
//! encoder and writes the result to a webrtc-rs sample track.
//!
//! ```text
//! CapturePipeline ──broadcast──> sender task ──encode──> TrackLocalStaticSample
//!                                                             │
//!                                                     RTCPeerConnection
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::utils::LogThrottler;
use crate::video::encoder::{VideoCodec, VideoEncoder};
use crate::video::frame::VideoFrame;

/// Video track configuration
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    pub track_id: String,
    pub stream_id: String,
    pub codec: VideoCodec,
}

impl Default for VideoTrackConfig {
    fn default() -> Self {
        Self {
            track_id: "screenTrack".to_string(),
            stream_id: "streamcaster".to_string(),
            codec: VideoCodec::H264,
        }
    }
}

/// Build the RTP codec capability advertised for `codec`
pub fn video_codec_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: codec.clock_rate(),
        channels: 0,
        sdp_fmtp_line: codec.sdp_fmtp().to_string(),
        rtcp_feedback: vec![],
    }
}

/// Video track statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct VideoTrackStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_lagged: u64,
    pub errors: u64,
}

#[derive(Default)]
struct TrackCounters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_lagged: AtomicU64,
    errors: AtomicU64,
}

/// Outbound screen video track for one session
pub struct ScreenVideoTrack {
    track: Arc<TrackLocalStaticSample>,
    config: VideoTrackConfig,
    counters: Arc<TrackCounters>,
    running: watch::Sender<bool>,
    sender: Option<JoinHandle<()>>,
}

impl ScreenVideoTrack {
    pub fn new(config: VideoTrackConfig) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            video_codec_capability(config.codec),
            config.track_id.clone(),
            config.stream_id.clone(),
        ));
        let (running, _) = watch::channel(false);

        debug!(
            "Created {} video track {} (stream {})",
            config.codec, config.track_id, config.stream_id
        );

        Self {
            track,
            config,
            counters: Arc::new(TrackCounters::default()),
            running,
            sender: None,
        }
    }

    /// Track as attached to a peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn is_sending(&self) -> bool {
        *self.running.borrow()
    }

    /// Spawn the sender task; replaces nothing if already sending
    pub fn start_sending(
        &mut self,
        mut frames: broadcast::Receiver<VideoFrame>,
        mut encoder: Box<dyn VideoEncoder>,
    ) {
        if self.sender.is_some() {
            warn!("Video track {} already sending", self.config.track_id);
            return;
        }

        self.running.send_replace(true);
        let mut running_rx = self.running.subscribe();
        let track = self.track.clone();
        let counters = self.counters.clone();
        let track_id = self.config.track_id.clone();

        self.sender = Some(tokio::spawn(async move {
            let throttler = LogThrottler::with_secs(5);
            info!("Video track {} sending ({})", track_id, encoder.codec());

            loop {
                tokio::select! {
                    biased;

                    changed = running_rx.changed() => {
                        if changed.is_err() || !*running_rx.borrow() {
                            break;
                        }
                    }

                    result = frames.recv() => {
                        let frame = match result {
                            Ok(frame) => frame,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                counters.frames_lagged.fetch_add(n, Ordering::Relaxed);
                                crate::debug_throttled!(
                                    throttler,
                                    "lagged",
                                    "Video track {} lagged by {} frames",
                                    track_id,
                                    n
                                );
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Frame source for {} closed", track_id);
                                break;
                            }
                        };

                        let encoded = match encoder.encode(&frame) {
                            Ok(Some(encoded)) => encoded,
                            Ok(None) => continue,
                            Err(e) => {
                                counters.errors.fetch_add(1, Ordering::Relaxed);
                                crate::warn_throttled!(throttler, "encode", "Encode failed on {}: {}", track_id, e);
                                continue;
                            }
                        };

                        let len = encoded.data.len() as u64;
                        let sample = Sample {
                            data: encoded.data,
                            duration: encoded.duration,
                            ..Default::default()
                        };

                        match track.write_sample(&sample).await {
                            Ok(()) => {
                                counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                                counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
                            }
                            Err(e) => {
                                counters.errors.fetch_add(1, Ordering::Relaxed);
                                crate::warn_throttled!(throttler, "write", "write_sample failed on {}: {}", track_id, e);
                            }
                        }
                    }
                }
            }

            info!(
                "Video track {} stopped: {} frames sent",
                track_id,
                counters.frames_sent.load(Ordering::Relaxed)
            );
        }));
    }

    /// Signal the sender task to exit
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Stop and wait for the sender task to finish
    pub async fn close(&mut self) {
        self.stop();
        if let Some(sender) = self.sender.take() {
            if let Err(e) = sender.await {
                warn!("Video track sender for {} ended abnormally: {}", self.config.track_id, e);
            }
        }
    }

    pub fn stats(&self) -> VideoTrackStats {
        VideoTrackStats {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            frames_lagged: self.counters.frames_lagged.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ScreenVideoTrack {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            self.running.send_replace(false);
            sender.abort();
        }
    }
}
