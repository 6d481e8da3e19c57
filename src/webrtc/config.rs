//! ICE server configuration

use serde::{Deserialize, Serialize};
use tracing::warn;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// URI schemes accepted for ICE servers
const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

/// A single STUN/TURN server descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URIs (e.g. ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(default)]
    pub username: String,
    /// Credential for TURN authentication
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    /// STUN server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    /// TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
        }
    }

    fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.credential.is_empty()
    }
}

/// Ordered ICE server list, read-only once a session is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceServerConfig {
    servers: Vec<IceServer>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
        }
    }
}

impl IceServerConfig {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }

    /// No ICE servers (host candidates only)
    pub fn empty() -> Self {
        Self { servers: vec![] }
    }

    pub fn servers(&self) -> &[IceServer] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Check that every URI carries a known ICE scheme and a host part
    pub fn validate(&self) -> Result<(), String> {
        for server in &self.servers {
            if server.urls.is_empty() {
                return Err("ICE server entry without URLs".to_string());
            }
            for url in &server.urls {
                validate_ice_url(url)?;
            }
        }
        Ok(())
    }

    /// Convert to webrtc-rs server list, preserving order
    ///
    /// TURN entries without credentials are skipped because webrtc-rs
    /// rejects them when creating the peer connection.
    pub fn to_rtc_servers(&self) -> Vec<RTCIceServer> {
        self.servers
            .iter()
            .filter(|server| {
                if server.is_turn() && !server.has_credentials() {
                    warn!(
                        "Skipping TURN server {:?} - credentials required but missing",
                        server.urls
                    );
                    return false;
                }
                true
            })
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect()
    }
}

fn validate_ice_url(url: &str) -> Result<(), String> {
    let scheme = ICE_SCHEMES
        .iter()
        .find(|scheme| url.starts_with(*scheme))
        .ok_or_else(|| format!("Unsupported ICE server URL: {}", url))?;

    let host = url[scheme.len()..].split(['?', ':']).next().unwrap_or("");
    if host.trim().is_empty() {
        return Err(format!("ICE server URL has no host: {}", url));
    }
    Ok(())
}
