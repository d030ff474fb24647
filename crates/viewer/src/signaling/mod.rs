//! Relay signaling: message shapes and the channel that carries them
//!
//! - [`protocol`]: JSON message shapes exchanged with the relay
//! - [`relay`]: channel/connector traits and the event sink
//! - [`websocket`]: tokio-tungstenite implementation

pub mod protocol;
pub mod relay;
pub mod websocket;

pub use protocol::{IceCandidate, InboundMessage, OutboundMessage, SdpKind, SessionDescription};
pub use relay::{RelayChannel, RelayConnector, RelayEvent, RelaySink, NORMAL_CLOSURE};
pub use websocket::WebSocketConnector;
