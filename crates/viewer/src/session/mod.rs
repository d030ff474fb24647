//! Signaling session
//!
//! A [`SignalingSession`] is a cheap, cloneable handle to a driver task that
//! owns at most one relay channel and one negotiator at a time. Results of
//! `connect()` and `disconnect()` are never returned directly; they show up
//! as [`ConnectionState`] snapshots on the watch channel from
//! [`SignalingSession::subscribe`].
//!
//! ```no_run
//! use streameasy_viewer::{SignalingSession, ViewerConfig};
//!
//! # async fn example() {
//! let session = SignalingSession::webrtc(ViewerConfig::new("ws://localhost:8080", "cam-1"));
//! let mut states = session.subscribe();
//! session.connect();
//!
//! while states.changed().await.is_ok() {
//!     let state = states.borrow_and_update().clone();
//!     println!("{} (connected: {})", state.phase, state.connected);
//! }
//! # }
//! ```

mod driver;

use crate::config::ViewerConfig;
use crate::media::MediaSink;
use crate::negotiation::{NegotiatorFactory, WebRtcNegotiatorFactory};
use crate::signaling::{RelayConnector, WebSocketConnector};
use crate::state::ConnectionState;
use driver::{Command, Driver};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

/// Handle to one signaling session
///
/// Dropping the last handle stops the driver and releases its resources.
#[derive(Clone)]
pub struct SignalingSession {
    inner: Arc<Inner>,
}

struct Inner {
    session_id: Uuid,
    camera_id: String,
    relay_url: String,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SignalingSession {
    /// Create a session and spawn its driver
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ViewerConfig,
        connector: Arc<dyn RelayConnector>,
        factory: Arc<dyn NegotiatorFactory>,
        media_sink: Option<Arc<dyn MediaSink>>,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let camera_id = config.camera_id.clone();
        let relay_url = config.relay_url();

        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Driver::new(config, connector, factory, media_sink, state_tx, events_tx);
        let span = info_span!("signaling_session", session_id = %session_id, camera_id = %camera_id);
        tokio::spawn(driver.run(commands_rx, events_rx).instrument(span));

        Self {
            inner: Arc::new(Inner {
                session_id,
                camera_id,
                relay_url,
                commands: commands_tx,
                state_rx,
            }),
        }
    }

    /// Session over a WebSocket relay with the `webrtc` engine
    pub fn webrtc(config: ViewerConfig) -> Self {
        Self::new(
            config,
            Arc::new(WebSocketConnector::new()),
            Arc::new(WebRtcNegotiatorFactory),
            None,
        )
    }

    /// Like [`SignalingSession::webrtc`], attaching live media to `sink`
    pub fn webrtc_with_sink(config: ViewerConfig, sink: Arc<dyn MediaSink>) -> Self {
        Self::new(
            config,
            Arc::new(WebSocketConnector::new()),
            Arc::new(WebRtcNegotiatorFactory),
            Some(sink),
        )
    }

    /// Start a connection attempt
    ///
    /// No-op without a camera id or while an attempt is already connecting.
    pub fn connect(&self) {
        if self.inner.commands.send(Command::Connect).is_err() {
            debug!("Session driver gone, connect ignored");
        }
    }

    /// Tear down the current attempt
    ///
    /// Returns once the relay channel and negotiator are released; no event
    /// from them can change the state afterwards. Never fails.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use streameasy_viewer::{Phase, SignalingSession, ViewerConfig};
    ///
    /// // No camera id: connect() is ignored
    /// let session = SignalingSession::webrtc(ViewerConfig::new("ws://localhost:8080", ""));
    /// session.connect();
    ///
    /// session.disconnect().await;
    /// session.disconnect().await;
    /// assert_eq!(session.state().phase, Phase::Disconnected);
    /// # });
    /// ```
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.commands.send(Command::Disconnect(ack_tx)).is_err() {
            debug!("Session driver gone, disconnect ignored");
            return;
        }
        let _ = ack_rx.await;
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    /// Subscribe to state snapshots
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Session identifier used in logs
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Camera this session views
    pub fn camera_id(&self) -> &str {
        &self.inner.camera_id
    }

    /// Relay endpoint of this session
    pub fn relay_url(&self) -> &str {
        &self.inner.relay_url
    }
}

impl std::fmt::Debug for SignalingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingSession")
            .field("session_id", &self.inner.session_id)
            .field("camera_id", &self.inner.camera_id)
            .field("phase", &self.inner.state_rx.borrow().phase)
            .finish()
    }
}
