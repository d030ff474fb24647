//! Media negotiation engine abstraction
//!
//! The signaling session drives a [`Negotiator`] through four calls and
//! learns about its progress through a [`NegotiationSink`]: local
//! descriptions/candidates to forward, remote tracks, peer link state changes
//! and asynchronous failures. [`peer`] holds the production engine.

pub mod peer;

use crate::config::ViewerConfig;
use crate::media::RemoteTrack;
use crate::signaling::{IceCandidate, OutboundMessage, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use peer::{WebRtcNegotiator, WebRtcNegotiatorFactory};

/// Locally generated signaling data to be sent to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSignal {
    /// Local offer or answer
    Description(SessionDescription),
    /// Local ICE candidate (trickle mode only)
    Candidate(IceCandidate),
}

impl From<LocalSignal> for OutboundMessage {
    fn from(signal: LocalSignal) -> Self {
        match signal {
            LocalSignal::Description(desc) => OutboundMessage::Description(desc),
            LocalSignal::Candidate(candidate) => OutboundMessage::Candidate(candidate),
        }
    }
}

/// Peer link state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    /// Not started
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Transport up
    Connected,
    /// Temporarily lost connectivity
    Disconnected,
    /// Transport failed
    Failed,
    /// Closed
    Closed,
}

/// Events produced by a negotiator
#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    /// Send this to the relay
    LocalSignal(LocalSignal),
    /// An inbound media track arrived
    Track(RemoteTrack),
    /// Peer link state changed
    PeerState(PeerLinkState),
    /// Background negotiation work failed
    Failed(String),
}

type Emit = dyn Fn(NegotiationEvent) -> bool + Send + Sync;

/// Where a negotiator reports its events
#[derive(Clone)]
pub struct NegotiationSink {
    emit: Arc<Emit>,
}

impl NegotiationSink {
    /// Build a sink from an emit function
    pub fn new<F>(emit: F) -> Self
    where
        F: Fn(NegotiationEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink backed by an unbounded channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NegotiationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(move |event| tx.send(event).is_ok()), rx)
    }

    /// Report an event; `false` once nobody is listening
    pub fn emit(&self, event: NegotiationEvent) -> bool {
        (self.emit)(event)
    }
}

impl fmt::Debug for NegotiationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NegotiationSink")
    }
}

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username (empty for STUN)
    pub username: String,
    /// TURN credential (empty for STUN)
    pub credential: String,
}

/// How a negotiation object is set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOptions {
    /// Create the offer (viewer side always initiates)
    pub initiator: bool,
    /// Forward candidates individually instead of gathering them into the description
    pub trickle: bool,
    /// Solicit an inbound audio track
    pub receive_audio: bool,
    /// Solicit an inbound video track
    pub receive_video: bool,
    /// ICE servers
    pub ice_servers: Vec<IceServer>,
}

impl NegotiationOptions {
    /// Offer-initiating, receive-only audio+video options for a viewer config
    pub fn from_config(config: &ViewerConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| IceServer {
                urls: vec![url.clone()],
                username: String::new(),
                credential: String::new(),
            })
            .chain(config.turn_servers.iter().map(|turn| IceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            }))
            .collect();

        Self {
            initiator: true,
            trickle: config.trickle_ice,
            receive_audio: true,
            receive_video: true,
            ice_servers,
        }
    }
}

/// One media negotiation object, bound to a single connection attempt
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Start the offer; the description arrives as a [`LocalSignal`] on the sink
    async fn create_offer(&self) -> Result<()>;

    /// Apply the remote offer or answer (an offer is answered through the sink)
    async fn apply_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Add a remote ICE candidate
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Tear down; must not fail and may be called more than once
    async fn close(&self);
}

/// Builds negotiation objects
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    /// Create a negotiator that reports to `events`
    async fn create(
        &self,
        options: &NegotiationOptions,
        events: NegotiationSink,
    ) -> Result<Box<dyn Negotiator>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    #[test]
    fn test_options_from_default_config() {
        let options = NegotiationOptions::from_config(&ViewerConfig::default());
        assert!(options.initiator);
        assert!(!options.trickle);
        assert!(options.receive_audio && options.receive_video);
        assert_eq!(options.ice_servers.len(), 2);
        assert!(options.ice_servers[0].urls[0].starts_with("stun:"));
    }

    #[test]
    fn test_options_include_turn_servers() {
        let mut config = ViewerConfig::default();
        config.turn_servers.push(TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "viewer".to_string(),
            credential: "secret".to_string(),
        });

        let options = NegotiationOptions::from_config(&config);
        let turn = options.ice_servers.last().unwrap();
        assert_eq!(turn.username, "viewer");
        assert_eq!(turn.credential, "secret");
    }

    #[test]
    fn test_local_signal_into_outbound() {
        let msg: OutboundMessage =
            LocalSignal::Description(SessionDescription::offer("v=0")).into();
        assert!(matches!(msg, OutboundMessage::Description(_)));
    }
}
