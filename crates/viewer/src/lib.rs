//! StreamEasy camera viewer connection core
//!
//! Establishes and keeps alive a live media connection to a remote camera
//! through a signaling relay.
//!
//! # Features
//!
//! - **Signaling session**: one relay channel and one WebRTC negotiation per attempt
//! - **State snapshots**: `tokio::sync::watch` stream of [`ConnectionState`]
//! - **Reconnection supervisor**: edge-triggered retries with capped exponential backoff
//! - **Pluggable seams**: relay transport ([`RelayConnector`]) and negotiation engine
//!   ([`NegotiatorFactory`]) are traits
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  SignalingSession (handle)                             │
//! │  └─ driver task                                        │
//! │     ├─ RelayChannel  (WebSocket, /ws/viewer/{camera})  │
//! │     ├─ Negotiator    (webrtc RTCPeerConnection)        │
//! │     └─ MediaStream → MediaSink                         │
//! │        ↓ watch<ConnectionState>                        │
//! │  ReconnectionSupervisor                                │
//! │  └─ retry timer → SignalingSession::connect()          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use streameasy_viewer::ViewerConfig;
//!
//! let config = ViewerConfig::new("ws://localhost:8080", "cam-1");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.relay_url(), "ws://localhost:8080/ws/viewer/cam-1");
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod reconnect;
pub mod session;
pub mod signaling;
pub mod state;
pub mod status;

pub use config::{ReconnectConfig, TurnServerConfig, ViewerConfig};
pub use error::{Error, ErrorKind, Result};
pub use media::{MediaHandle, MediaSink, MediaStream, RemoteTrack, TrackKind};
pub use negotiation::{
    NegotiationEvent, NegotiationOptions, NegotiationSink, Negotiator, NegotiatorFactory,
    WebRtcNegotiatorFactory,
};
pub use reconnect::{BackoffPolicy, ReconnectStatus, ReconnectionSupervisor};
pub use session::SignalingSession;
pub use signaling::{RelayChannel, RelayConnector, RelayEvent, RelaySink, WebSocketConnector};
pub use state::{ConnectionState, Phase};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
