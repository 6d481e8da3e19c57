//! Shared media engine
//!
//! Owns the process-wide WebRTC API object (codec registry, interceptors,
//! ICE settings), the render context hardware encoders bind to, and the
//! encoder factory. Sessions hold it through reference-counted
//! [`EngineHandle`]s:
//!
//! ```text
//! acquire() ──> refs 0 -> 1: EngineFactory::build()  (under the engine lock)
//! acquire() ──> refs n -> n+1
//! release() ──> refs n -> n-1; at 0 the resources are dropped
//! ```
//!
//! A failed build leaves the engine uninitialized with an unchanged count so
//! the next `acquire()` starts over.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::interceptor::registry::Registry;

use super::mdns::{mdns_host_name, mdns_mode, mdns_mode_label};
use crate::error::EngineInitError;
use crate::video::encoder::{EncoderFactory, PassthroughEncoderFactory};

/// Engine construction settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// mDNS candidate mode ("disabled", "query_only", "query_and_gather")
    pub mdns_mode: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mdns_mode: "query_only".to_string(),
        }
    }
}

/// Context hardware encoders attach to
///
/// The built-in context is software only; platform factories substitute
/// their own GPU-backed context.
#[derive(Debug)]
pub struct RenderContext {
    id: Uuid,
    hardware: bool,
    created_at: Instant,
}

impl RenderContext {
    pub fn software() -> Self {
        Self {
            id: Uuid::new_v4(),
            hardware: false,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_hardware(&self) -> bool {
        self.hardware
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        debug!(
            "Render context {} released after {:?}",
            self.id,
            self.created_at.elapsed()
        );
    }
}

/// Everything an initialized engine owns
pub struct EngineResources {
    api: API,
    context: RenderContext,
    encoders: Arc<dyn EncoderFactory>,
    live_connections: AtomicUsize,
}

impl EngineResources {
    pub fn new(api: API, context: RenderContext, encoders: Arc<dyn EncoderFactory>) -> Self {
        Self {
            api,
            context,
            encoders,
            live_connections: AtomicUsize::new(0),
        }
    }

    pub fn api(&self) -> &API {
        &self.api
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn encoders(&self) -> &Arc<dyn EncoderFactory> {
        &self.encoders
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::SeqCst)
    }
}

/// Builds engine resources on first acquire
pub trait EngineFactory: Send + Sync {
    fn build(&self, config: &EngineConfig) -> Result<EngineResources, EngineInitError>;
}

/// webrtc-rs engine with default codecs and interceptors
#[derive(Default)]
pub struct WebRtcEngineFactory {
    encoders: Option<Arc<dyn EncoderFactory>>,
}

impl WebRtcEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoders(encoders: Arc<dyn EncoderFactory>) -> Self {
        Self {
            encoders: Some(encoders),
        }
    }
}

impl EngineFactory for WebRtcEngineFactory {
    fn build(&self, config: &EngineConfig) -> Result<EngineResources, EngineInitError> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|e| EngineInitError::Api(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut codecs).map_err(|e| {
            EngineInitError::Api(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode(&config.mdns_mode);
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            let instance = Uuid::new_v4().simple().to_string();
            setting_engine.set_multicast_dns_host_name(mdns_host_name(&instance[..8]));
        }
        info!("WebRTC mDNS mode: {}", mdns_mode_label(mode));

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        let encoders = self
            .encoders
            .clone()
            .unwrap_or_else(|| Arc::new(PassthroughEncoderFactory));

        Ok(EngineResources::new(api, RenderContext::software(), encoders))
    }
}

struct EngineSlot {
    refs: usize,
    resources: Option<Arc<EngineResources>>,
}

/// Reference-counted shared media engine
pub struct MediaEngine {
    factory: Box<dyn EngineFactory>,
    config: EngineConfig,
    slot: Mutex<EngineSlot>,
    init_count: AtomicU64,
}

impl MediaEngine {
    pub fn new(factory: impl EngineFactory + 'static, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            factory: Box::new(factory),
            config,
            slot: Mutex::new(EngineSlot {
                refs: 0,
                resources: None,
            }),
            init_count: AtomicU64::new(0),
        })
    }

    /// Engine backed by webrtc-rs with default settings
    pub fn webrtc(config: EngineConfig) -> Arc<Self> {
        Self::new(WebRtcEngineFactory::new(), config)
    }

    /// Take a shared reference, initializing on first use
    pub fn acquire(self: &Arc<Self>) -> Result<EngineHandle, EngineInitError> {
        let mut slot = self.slot.lock();

        let resources = match &slot.resources {
            Some(resources) => resources.clone(),
            None => {
                let resources = Arc::new(self.factory.build(&self.config)?);
                self.init_count.fetch_add(1, Ordering::SeqCst);
                info!(
                    "Media engine initialized (render context {})",
                    resources.context().id()
                );
                slot.resources = Some(resources.clone());
                resources
            }
        };

        slot.refs += 1;
        debug!("Media engine acquired (refs={})", slot.refs);

        Ok(EngineHandle {
            engine: self.clone(),
            resources: Some(resources),
        })
    }

    fn release_resources(&self) {
        let mut slot = self.slot.lock();
        slot.refs = slot.refs.saturating_sub(1);
        debug!("Media engine released (refs={})", slot.refs);

        if slot.refs == 0 {
            if let Some(resources) = slot.resources.take() {
                let live = resources.live_connections();
                if live > 0 {
                    warn!(
                        "Media engine torn down with {} live peer connection(s)",
                        live
                    );
                }
                info!("Media engine shut down");
            }
        }
    }

    /// Current number of outstanding handles
    pub fn ref_count(&self) -> usize {
        self.slot.lock().refs
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.lock().resources.is_some()
    }

    /// How many times the resources have been built
    pub fn init_count(&self) -> u64 {
        self.init_count.load(Ordering::SeqCst)
    }
}

/// One session's reference to the media engine
///
/// Release explicitly with [`EngineHandle::release`]; dropping an
/// unreleased handle releases it with a warning.
pub struct EngineHandle {
    engine: Arc<MediaEngine>,
    resources: Option<Arc<EngineResources>>,
}

impl EngineHandle {
    pub fn resources(&self) -> Option<&Arc<EngineResources>> {
        self.resources.as_ref()
    }

    /// Record a peer connection built from this engine
    pub fn connection_lease(&self) -> Option<ConnectionLease> {
        let resources = self.resources.clone()?;
        resources.live_connections.fetch_add(1, Ordering::SeqCst);
        Some(ConnectionLease {
            resources: Some(resources),
        })
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.resources.take().is_some() {
            self.engine.release_resources();
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("released", &self.resources.is_none())
            .finish()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.resources.is_some() {
            warn!("Engine handle dropped without release");
            self.release_inner();
        }
    }
}

/// Marks one live peer connection on the engine
pub struct ConnectionLease {
    resources: Option<Arc<EngineResources>>,
}

impl ConnectionLease {
    pub fn end(mut self) {
        self.end_inner();
    }

    fn end_inner(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.live_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.end_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Fails until switched on
    struct FlakyFactory {
        healthy: AtomicBool,
    }

    impl EngineFactory for FlakyFactory {
        fn build(&self, config: &EngineConfig) -> Result<EngineResources, EngineInitError> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(EngineInitError::Context("no GPU".to_string()));
            }
            WebRtcEngineFactory::new().build(config)
        }
    }

    #[test]
    fn test_acquire_release_refcount() {
        let engine = MediaEngine::webrtc(EngineConfig::default());
        assert!(!engine.is_initialized());

        let a = engine.acquire().unwrap();
        let b = engine.acquire().unwrap();
        assert_eq!(engine.ref_count(), 2);
        assert_eq!(engine.init_count(), 1);

        a.release();
        assert!(engine.is_initialized());
        b.release();
        assert_eq!(engine.ref_count(), 0);
        assert!(!engine.is_initialized());

        // Re-initializes after full release
        let c = engine.acquire().unwrap();
        assert_eq!(engine.init_count(), 2);
        drop(c);
        assert_eq!(engine.ref_count(), 0);
    }

    #[test]
    fn test_failed_init_does_not_poison() {
        let engine = MediaEngine::new(
            FlakyFactory {
                healthy: AtomicBool::new(false),
            },
            EngineConfig::default(),
        );

        assert!(matches!(engine.acquire(), Err(EngineInitError::Context(_))));
        assert_eq!(engine.ref_count(), 0);
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_concurrent_first_acquire_builds_once() {
        let engine = MediaEngine::webrtc(EngineConfig::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.acquire().unwrap())
            })
            .collect();
        let acquired: Vec<EngineHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(engine.init_count(), 1);
        assert_eq!(engine.ref_count(), 8);
        acquired.into_iter().for_each(EngineHandle::release);
        assert_eq!(engine.ref_count(), 0);
    }

    #[test]
    fn test_connection_lease_tracking() {
        let engine = MediaEngine::webrtc(EngineConfig::default());
        let handle = engine.acquire().unwrap();
        let resources = handle.resources().unwrap().clone();

        let lease = handle.connection_lease().unwrap();
        assert_eq!(resources.live_connections(), 1);
        lease.end();
        assert_eq!(resources.live_connections(), 0);
        handle.release();
    }
}
