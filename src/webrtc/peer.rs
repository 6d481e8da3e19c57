//! Peer connection wrapper
//!
//! Builds an `RTCPeerConnection` from the shared engine, forwards its state
//! and local ICE candidates to the owning session as [`PeerEvent`]s, and
//! exposes the SDP exchange the host's signaling channel drives.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use super::config::IceServerConfig;
use super::engine::{ConnectionLease, EngineHandle};
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use crate::error::ConnectionError;

/// Notifications raised from peer connection callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    ConnectionState(ConnectionState),
    LocalCandidate(IceCandidate),
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// One outbound peer connection
pub struct PeerLink {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<ConnectionState>,
    candidates: Arc<Mutex<Vec<IceCandidate>>>,
    gather_wait: Duration,
    lease: Option<ConnectionLease>,
}

impl PeerLink {
    /// Create a peer connection on the engine's API
    pub async fn connect(
        engine: &EngineHandle,
        ice: &IceServerConfig,
        session_id: impl Into<String>,
        gather_wait: Duration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, ConnectionError> {
        let session_id = session_id.into();
        ice.validate().map_err(ConnectionError::Create)?;

        let resources = engine
            .resources()
            .ok_or_else(|| ConnectionError::Create("media engine already released".to_string()))?;

        let rtc_config = RTCConfiguration {
            ice_servers: ice.to_rtc_servers(),
            ..Default::default()
        };

        let pc = resources
            .api()
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| ConnectionError::Create(e.to_string()))?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let link = Self {
            session_id,
            pc: Arc::new(pc),
            state_rx,
            candidates: Arc::new(Mutex::new(Vec::new())),
            gather_wait,
            lease: engine.connection_lease(),
        };
        link.install_observers(Arc::new(state_tx), events);

        info!("Peer connection created for session {}", link.session_id);
        Ok(link)
    }

    fn install_observers(
        &self,
        state: Arc<watch::Sender<ConnectionState>>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) {
        let session_id = self.session_id.clone();
        let state_events = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let events = state_events.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    let Some(new_state) = map_state(s) else {
                        return;
                    };
                    info!("Session {} peer state: {}", session_id, new_state);
                    let _ = state.send(new_state);
                    let _ = events.send(PeerEvent::ConnectionState(new_state));
                })
            }));

        let session_id = self.session_id.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state| {
                let session_id = session_id.clone();
                Box::pin(async move {
                    info!("[ICE] Session {} connection state: {:?}", session_id, state);
                })
            }));

        let session_id = self.session_id.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state| {
                let session_id = session_id.clone();
                Box::pin(async move {
                    debug!("[ICE] Session {} gathering state: {:?}", session_id, state);
                })
            }));

        let candidates = self.candidates.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidates = candidates.clone();
                let events = events.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        return;
                    };
                    let json = match c.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            debug!("Dropping unserializable ICE candidate: {}", e);
                            return;
                        }
                    };
                    debug!("ICE candidate: {}", json.candidate);

                    let candidate = IceCandidate {
                        candidate: json.candidate,
                        sdp_mid: json.sdp_mid,
                        sdp_mline_index: json.sdp_mline_index,
                        username_fragment: json.username_fragment,
                    };
                    candidates.lock().await.push(candidate.clone());
                    let _ = events.send(PeerEvent::LocalCandidate(candidate));
                })
            }));
    }

    /// Attach an outbound track
    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), ConnectionError> {
        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(|e| ConnectionError::AddTrack(e.to_string()))?;

        // Drain RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        info!("Video track attached (session {})", self.session_id);
        Ok(())
    }

    /// Create a local offer; candidates gathered within the wait are inlined
    pub async fn create_offer(&self) -> Result<SdpOffer, ConnectionError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| ConnectionError::Signaling(format!("create offer: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| ConnectionError::Signaling(format!("set local description: {}", e)))?;

        tokio::time::sleep(self.gather_wait).await;

        let sdp = self
            .pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or(offer.sdp);
        Ok(SdpOffer::new(sdp))
    }

    /// Answer a remote offer
    pub async fn handle_offer(&self, offer: SdpOffer) -> Result<SdpAnswer, ConnectionError> {
        let sdp = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| ConnectionError::Signaling(format!("invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| ConnectionError::Signaling(format!("set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| ConnectionError::Signaling(format!("create answer: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| ConnectionError::Signaling(format!("set local description: {}", e)))?;

        tokio::time::sleep(self.gather_wait).await;

        let candidates = self.candidates.lock().await.clone();
        Ok(SdpAnswer::with_candidates(answer.sdp, candidates))
    }

    /// Apply the remote answer to a previously created offer
    pub async fn apply_answer(&self, answer: SdpAnswer) -> Result<(), ConnectionError> {
        let sdp = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| ConnectionError::Signaling(format!("invalid SDP answer: {}", e)))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| ConnectionError::Signaling(format!("set remote description: {}", e)))?;

        for candidate in answer.ice_candidates {
            self.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectionError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| ConnectionError::Signaling(format!("add ICE candidate: {}", e)))
    }

    /// Local candidates gathered so far
    pub async fn local_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().await.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Close the connection and end its engine lease
    pub async fn close(mut self) -> Result<(), ConnectionError> {
        let result = self
            .pc
            .close()
            .await
            .map_err(|e| ConnectionError::Close(e.to_string()));

        if let Some(lease) = self.lease.take() {
            lease.end();
        }

        match &result {
            Ok(()) => info!("Peer connection closed (session {})", self.session_id),
            Err(e) => warn!("Peer connection close for {} failed: {}", self.session_id, e),
        }
        result
    }
}
