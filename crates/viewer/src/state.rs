//! Connection state snapshots published by the signaling session

use crate::error::ErrorKind;
use crate::media::MediaHandle;
use std::fmt;

/// Discrete connection lifecycle phase exposed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No attempt made yet
    New,
    /// Attempt in flight (relay opening, or open and negotiating)
    Connecting,
    /// Relay open and live media flowing
    Connected,
    /// Relay channel closed, or `disconnect()` called
    Disconnected,
    /// Attempt failed (transport, relay error, negotiation)
    Failed,
    /// Media path closed by the peer
    Closed,
}

impl Phase {
    /// Phases that make the session eligible for a reconnection attempt
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Phase::Disconnected | Phase::Failed | Phase::Closed)
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::New => "new",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Disconnected => "disconnected",
            Phase::Failed => "failed",
            Phase::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a session's connection state
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    /// Live media, present only once tracks have arrived
    pub media: Option<MediaHandle>,
    /// Relay channel open and media live
    pub connected: bool,
    /// An attempt is in flight
    pub loading: bool,
    /// Last failure description, cleared when a new attempt starts
    pub error: Option<String>,
    /// Class of `error`
    pub error_kind: Option<ErrorKind>,
    /// Lifecycle phase, derived from the attempt outcome and the two flags below
    pub phase: Phase,
    /// Relay (signaling) channel is open
    pub channel_open: bool,
    /// Negotiation produced live inbound media
    pub media_ready: bool,
    /// Number of the connection attempt this snapshot belongs to; 0 before the first
    pub attempt: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            media: None,
            connected: false,
            loading: false,
            error: None,
            error_kind: None,
            phase: Phase::New,
            channel_open: false,
            media_ready: false,
            attempt: 0,
        }
    }
}

impl ConnectionState {
    /// Check the snapshot invariants
    ///
    /// `connected` implies phase `Connected` with media; `Failed`/`Closed` carry no media.
    pub fn is_consistent(&self) -> bool {
        let connected_ok =
            !self.connected || (self.phase == Phase::Connected && self.media.is_some());
        let terminal_ok =
            !matches!(self.phase, Phase::Failed | Phase::Closed) || self.media.is_none();
        connected_ok && terminal_ok
    }

    /// Whether this snapshot reports a live, successful connection
    pub fn is_live(&self) -> bool {
        self.connected && self.phase == Phase::Connected
    }
}

/// Outcome of the current attempt, independent of the link flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Idle,
    Active,
    Failed,
    Disconnected,
    Closed,
}

/// The two orthogonal link flags the public phase is derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LinkFlags {
    pub channel_open: bool,
    pub media_ready: bool,
}

pub(crate) fn derive_phase(lifecycle: Lifecycle, link: LinkFlags) -> Phase {
    match lifecycle {
        Lifecycle::Idle => Phase::New,
        Lifecycle::Active if link.channel_open && link.media_ready => Phase::Connected,
        Lifecycle::Active => Phase::Connecting,
        Lifecycle::Failed => Phase::Failed,
        Lifecycle::Disconnected => Phase::Disconnected,
        Lifecycle::Closed => Phase::Closed,
    }
}
