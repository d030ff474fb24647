//! Viewer Integration Test Harness
//!
//! Scripted doubles for the two session seams:
//! - [`MockRelay`]: a [`RelayConnector`] that records every channel it opens,
//!   every message sent and every close, and lets tests inject relay events
//! - [`MockEngine`]: a [`NegotiatorFactory`] whose negotiators emit a canned
//!   offer, answer remote offers and record remote descriptions/candidates
//!
//! Basic usage pattern:
//!
//! 1. Build a session with [`session_with`]
//! 2. Call `connect()`, then drive the relay with [`MockRelay::emit`]
//! 3. Wait for snapshots with [`wait_for_state`]

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use streameasy_viewer::media::{MediaSink, MediaStream, RemoteTrack, TrackKind};
use streameasy_viewer::negotiation::{
    LocalSignal, NegotiationEvent, NegotiationOptions, NegotiationSink, Negotiator,
    NegotiatorFactory, PeerLinkState,
};
use streameasy_viewer::signaling::{
    IceCandidate, RelayChannel, RelayConnector, RelayEvent, RelaySink, SdpKind,
    SessionDescription,
};
use streameasy_viewer::{ConnectionState, Result, SignalingSession, ViewerConfig};
use tokio::sync::watch;

/// SDP text the mock negotiator offers
pub const MOCK_OFFER_SDP: &str = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// SDP text the mock negotiator answers remote offers with
pub const MOCK_ANSWER_SDP: &str = "v=0\r\na=mock-answer\r\n";

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,streameasy_viewer=debug")
        .with_test_writer()
        .try_init();
}

/// Config for camera `cam-1` on a fake relay, 30s negotiation timeout
pub fn test_config() -> ViewerConfig {
    ViewerConfig::new("ws://relay.test", "cam-1")
}

/// Session wired to the given doubles
pub fn session_with(
    config: ViewerConfig,
    relay: &MockRelay,
    engine: &MockEngine,
    sink: Option<Arc<dyn MediaSink>>,
) -> SignalingSession {
    SignalingSession::new(
        config,
        Arc::new(relay.clone()),
        Arc::new(engine.clone()),
        sink,
    )
}

/// Wait until a snapshot satisfies `pred` (5s limit)
pub async fn wait_for_state<F>(
    states: &mut watch::Receiver<ConnectionState>,
    pred: F,
) -> ConnectionState
where
    F: Fn(&ConnectionState) -> bool,
{
    let wait = async {
        loop {
            {
                let state = states.borrow_and_update();
                if pred(&state) {
                    return state.clone();
                }
            }
            if states.changed().await.is_err() {
                panic!("session dropped while waiting for state");
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for state")
}

/// Let the session driver drain its queues
///
/// With a paused clock the sleep only completes once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Relay double
// ============================================================================

#[derive(Default)]
struct RelayLog {
    urls: Vec<String>,
    sinks: Vec<RelaySink>,
    sent: Vec<String>,
    closes: Vec<(usize, u16)>,
}

/// Scripted relay connector
#[derive(Clone)]
pub struct MockRelay {
    log: Arc<Mutex<RelayLog>>,
    opens: Arc<watch::Sender<usize>>,
}

impl Default for MockRelay {
    fn default() -> Self {
        let (opens, _) = watch::channel(0);
        Self {
            log: Arc::default(),
            opens: Arc::new(opens),
        }
    }
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels opened so far
    pub fn open_count(&self) -> usize {
        self.log.lock().urls.len()
    }

    /// URLs of every channel opened, in order
    pub fn urls(&self) -> Vec<String> {
        self.log.lock().urls.clone()
    }

    /// Emit an event on the most recently opened channel
    pub fn emit(&self, event: RelayEvent) -> bool {
        let sink = self.log.lock().sinks.last().cloned();
        sink.expect("no relay channel opened").emit(event)
    }

    /// Emit an event on channel `index` (0-based open order)
    pub fn emit_on(&self, index: usize, event: RelayEvent) -> bool {
        let sink = self.log.lock().sinks.get(index).cloned();
        sink.expect("no such relay channel").emit(event)
    }

    /// Deliver a JSON message from the relay on the latest channel
    pub fn deliver(&self, json: serde_json::Value) -> bool {
        self.emit(RelayEvent::Message(json.to_string()))
    }

    /// Messages sent by the session, parsed as JSON
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.log
            .lock()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).expect("session sent invalid JSON"))
            .collect()
    }

    /// `(channel index, close code)` for every close
    pub fn closes(&self) -> Vec<(usize, u16)> {
        self.log.lock().closes.clone()
    }

    /// Wait until at least `n` channels were opened
    pub async fn wait_for_opens(&self, n: usize) {
        let mut rx = self.opens.subscribe();
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for relay channel")
            .expect("relay dropped");
    }
}

impl RelayConnector for MockRelay {
    fn open(&self, url: &str, events: RelaySink) -> Box<dyn RelayChannel> {
        let index = {
            let mut log = self.log.lock();
            log.urls.push(url.to_string());
            log.sinks.push(events);
            log.urls.len() - 1
        };
        self.opens.send_replace(index + 1);

        Box::new(MockChannel {
            index,
            log: Arc::clone(&self.log),
            closed: false,
        })
    }
}

struct MockChannel {
    index: usize,
    log: Arc<Mutex<RelayLog>>,
    closed: bool,
}

impl RelayChannel for MockChannel {
    fn send(&self, text: String) -> Result<()> {
        if self.closed {
            return Err(streameasy_viewer::Error::WebSocketError(
                "Channel already closed".to_string(),
            ));
        }
        self.log.lock().sent.push(text);
        Ok(())
    }

    fn close(&mut self, code: u16, _reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.log.lock().closes.push((self.index, code));
    }
}

// ============================================================================
// Negotiation double
// ============================================================================

#[derive(Default)]
struct EngineLog {
    created: usize,
    sinks: Vec<NegotiationSink>,
    options: Vec<NegotiationOptions>,
    remote_descriptions: Vec<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    closed: usize,
    fail_create: bool,
    reject_candidates: bool,
}

/// Scripted negotiation engine
#[derive(Clone, Default)]
pub struct MockEngine {
    log: Arc<Mutex<EngineLog>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create` fail
    pub fn fail_create(&self) {
        self.log.lock().fail_create = true;
    }

    /// Make `add_remote_candidate` fail
    pub fn reject_candidates(&self) {
        self.log.lock().reject_candidates = true;
    }

    pub fn created(&self) -> usize {
        self.log.lock().created
    }

    pub fn closed(&self) -> usize {
        self.log.lock().closed
    }

    pub fn options(&self) -> Vec<NegotiationOptions> {
        self.log.lock().options.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.log.lock().remote_descriptions.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.log.lock().remote_candidates.clone()
    }

    /// Emit an event from the most recent negotiator
    pub fn emit(&self, event: NegotiationEvent) -> bool {
        let sink = self.log.lock().sinks.last().cloned();
        sink.expect("no negotiator created").emit(event)
    }

    /// Deliver a remote track from the most recent negotiator
    pub fn emit_track(&self, id: &str, kind: TrackKind) -> bool {
        self.emit(NegotiationEvent::Track(RemoteTrack::new(id, "stream-1", kind)))
    }

    pub fn emit_peer_state(&self, state: PeerLinkState) -> bool {
        self.emit(NegotiationEvent::PeerState(state))
    }
}

#[async_trait]
impl NegotiatorFactory for MockEngine {
    async fn create(
        &self,
        options: &NegotiationOptions,
        events: NegotiationSink,
    ) -> Result<Box<dyn Negotiator>> {
        let mut log = self.log.lock();
        if log.fail_create {
            return Err(streameasy_viewer::Error::PeerConnectionError(
                "mock engine refused".to_string(),
            ));
        }
        log.created += 1;
        log.options.push(options.clone());
        log.sinks.push(events.clone());

        Ok(Box::new(MockNegotiator {
            log: Arc::clone(&self.log),
            events,
        }))
    }
}

struct MockNegotiator {
    log: Arc<Mutex<EngineLog>>,
    events: NegotiationSink,
}

#[async_trait]
impl Negotiator for MockNegotiator {
    async fn create_offer(&self) -> Result<()> {
        self.events
            .emit(NegotiationEvent::LocalSignal(LocalSignal::Description(
                SessionDescription::offer(MOCK_OFFER_SDP),
            )));
        Ok(())
    }

    async fn apply_remote_description(&self, description: SessionDescription) -> Result<()> {
        let kind = description.kind;
        self.log.lock().remote_descriptions.push(description);

        if kind == SdpKind::Offer {
            self.events
                .emit(NegotiationEvent::LocalSignal(LocalSignal::Description(
                    SessionDescription::answer(MOCK_ANSWER_SDP),
                )));
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut log = self.log.lock();
        if log.reject_candidates {
            return Err(streameasy_viewer::Error::IceCandidateError(
                "mock rejected candidate".to_string(),
            ));
        }
        log.remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.log.lock().closed += 1;
    }
}

// ============================================================================
// Media sink double
// ============================================================================

/// Counts media sink callbacks
#[derive(Default)]
pub struct RecordingSink {
    pub attached: Mutex<Vec<String>>,
    pub added: Mutex<Vec<String>>,
    pub detached: Mutex<usize>,
}

impl MediaSink for RecordingSink {
    fn attach(&self, media: &Arc<MediaStream>) {
        self.attached.lock().push(media.stream_id().to_string());
    }

    fn track_added(&self, track: &RemoteTrack) {
        self.added.lock().push(track.id().to_string());
    }

    fn detach(&self) {
        *self.detached.lock() += 1;
    }
}
