//! Relay channel abstraction
//!
//! A [`RelayConnector`] opens one [`RelayChannel`] per connection attempt.
//! Opening returns immediately; the outcome arrives as [`RelayEvent`]s on the
//! [`RelaySink`] handed to `open`.

use crate::Result;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// WebSocket close code for a normal, caller-initiated closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the channel ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Events produced by a relay channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Channel is open and can carry messages
    Opened,
    /// Text message from the relay
    Message(String),
    /// Channel failed to open or broke
    Error(String),
    /// Channel closed (by either side)
    Closed {
        /// Close code
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },
}

type Emit = dyn Fn(RelayEvent) -> bool + Send + Sync;

/// Where a relay channel reports its events
///
/// `emit` returns `false` once nobody is listening anymore.
#[derive(Clone)]
pub struct RelaySink {
    emit: Arc<Emit>,
}

impl RelaySink {
    /// Build a sink from an emit function
    pub fn new<F>(emit: F) -> Self
    where
        F: Fn(RelayEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink backed by an unbounded channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(move |event| tx.send(event).is_ok()), rx)
    }

    /// Report an event
    pub fn emit(&self, event: RelayEvent) -> bool {
        (self.emit)(event)
    }
}

impl fmt::Debug for RelaySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RelaySink")
    }
}

/// One bidirectional relay channel
pub trait RelayChannel: Send {
    /// Queue a text message for the relay
    fn send(&self, text: String) -> Result<()>;

    /// Close the channel; idempotent and valid before the channel opened
    fn close(&mut self, code: u16, reason: &str);
}

/// Opens relay channels
pub trait RelayConnector: Send + Sync {
    /// Start opening a channel to `url`; events are reported on `events`
    fn open(&self, url: &str, events: RelaySink) -> Box<dyn RelayChannel>;
}
