//! Configuration types for the viewer connection core

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default public STUN endpoints (two independent hosts for resolution redundancy)
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Main configuration for a camera viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Relay base address (ws:// or wss://), without the `/ws/viewer/...` suffix
    pub server_url: String,

    /// Camera identifier to view
    pub camera_id: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Seconds to wait for live media after `connect()` (default: 30, 0 disables)
    pub negotiation_timeout_secs: u64,

    /// Send the offer before gathering completes and forward candidates (default: false)
    pub trickle_ice: bool,

    /// Automatic reconnection settings
    pub reconnect: ReconnectConfig,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Reconnection settings consumed by the reconnection supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether failures schedule retries at all (default: true)
    pub enabled: bool,

    /// Maximum retries between two successful connections (default: 5)
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (default: 2000)
    pub initial_delay_ms: u64,

    /// Upper bound for the retry delay in milliseconds (default: 30000)
    pub max_delay_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080".to_string(),
            camera_id: String::new(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            negotiation_timeout_secs: 30,
            trickle_ice: false,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 2000,
            max_delay_ms: 30000,
        }
    }
}

impl ReconnectConfig {
    /// Initial delay as a Duration
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum delay as a Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Validate delay bounds
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }

        Ok(())
    }
}

impl ViewerConfig {
    /// Build a config for one camera with default ICE and reconnection settings
    pub fn new(server_url: impl Into<String>, camera_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            camera_id: camera_id.into(),
            ..Default::default()
        }
    }

    /// Load a config from a TOML file; missing fields fall back to defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            Error::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Negotiation deadline, `None` when disabled
    pub fn negotiation_timeout(&self) -> Option<Duration> {
        (self.negotiation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.negotiation_timeout_secs))
    }

    /// Relay channel address for the configured camera
    pub fn relay_url(&self) -> String {
        relay_url(&self.server_url, &self.camera_id)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `server_url` is not a valid ws:// or wss:// URL
    /// - `stun_servers` is empty
    /// - the reconnection delays are out of bounds
    ///
    /// An empty `camera_id` is accepted here; `connect()` treats it as a no-op.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url).map_err(|e| {
            Error::InvalidConfig(format!("server_url {:?} is not a URL: {}", self.server_url, e))
        })?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::InvalidConfig(format!(
                "server_url must start with ws:// or wss://, got {}",
                self.server_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        self.reconnect.validate()
    }
}

/// Join a relay base address and a camera id into the viewer endpoint
pub fn relay_url(server_url: &str, camera_id: &str) -> String {
    format!("{}/ws/viewer/{}", server_url.trim_end_matches('/'), camera_id)
}

/// Derive the relay base address from the HTTP API base (`http` -> `ws`, `https` -> `wss`)
pub fn relay_base_from_http(api_base: &str) -> Result<String> {
    let mut url = Url::parse(api_base)
        .map_err(|e| Error::InvalidConfig(format!("api url {:?} is not a URL: {}", api_base, e)))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(api_base.trim_end_matches('/').to_string()),
        other => {
            return Err(Error::InvalidConfig(format!(
                "api url must be http(s), got scheme {}",
                other
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| Error::InvalidConfig(format!("cannot switch {} to {}", api_base, scheme)))?;

    Ok(url.as_str().trim_end_matches('/').to_string())
}
