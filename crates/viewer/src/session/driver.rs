//! Session driver task
//!
//! Owns the relay channel, the negotiator and the media stream of one
//! session. Commands from handles and events from the current resources are
//! handled one at a time, and every transition publishes a fresh snapshot.

use crate::config::ViewerConfig;
use crate::media::{MediaHandle, MediaSink, MediaStream, RemoteTrack};
use crate::negotiation::{
    NegotiationEvent, NegotiationOptions, NegotiationSink, Negotiator, NegotiatorFactory,
    PeerLinkState,
};
use crate::signaling::{
    InboundMessage, OutboundMessage, RelayChannel, RelayConnector, RelayEvent, RelaySink,
    NORMAL_CLOSURE,
};
use crate::state::{derive_phase, ConnectionState, Lifecycle, LinkFlags, Phase};
use crate::{Error, ErrorKind};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests from session handles
pub(crate) enum Command {
    Connect,
    Disconnect(oneshot::Sender<()>),
}

/// Event tagged with the generation of the resources that produced it
#[derive(Debug)]
pub(crate) struct SessionEvent {
    generation: u64,
    kind: EventKind,
}

#[derive(Debug)]
enum EventKind {
    Relay(RelayEvent),
    Negotiation(NegotiationEvent),
}

pub(crate) struct Driver {
    config: ViewerConfig,
    relay_url: String,
    options: NegotiationOptions,
    connector: Arc<dyn RelayConnector>,
    factory: Arc<dyn NegotiatorFactory>,
    media_sink: Option<Arc<dyn MediaSink>>,

    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,

    /// Bumped whenever resources are released; older events are dropped
    generation: u64,
    /// Bumped by every `connect()` that starts an attempt
    attempt: u64,
    lifecycle: Lifecycle,
    link: LinkFlags,
    loading: bool,
    error: Option<(ErrorKind, String)>,

    channel: Option<Box<dyn RelayChannel>>,
    negotiator: Option<Box<dyn Negotiator>>,
    media: Option<Arc<MediaStream>>,
    deadline: Option<Instant>,
}

impl Driver {
    pub(crate) fn new(
        config: ViewerConfig,
        connector: Arc<dyn RelayConnector>,
        factory: Arc<dyn NegotiatorFactory>,
        media_sink: Option<Arc<dyn MediaSink>>,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            relay_url: config.relay_url(),
            options: NegotiationOptions::from_config(&config),
            config,
            connector,
            factory,
            media_sink,
            state_tx,
            events_tx,
            generation: 0,
            attempt: 0,
            lifecycle: Lifecycle::Idle,
            link: LinkFlags::default(),
            loading: false,
            error: None,
            channel: None,
            negotiator: None,
            media: None,
            deadline: None,
        }
    }

    /// Process commands and events until every handle is gone
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        debug!("Session driver started");

        loop {
            let deadline = self.deadline;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect().await,
                    Some(Command::Disconnect(ack)) => {
                        self.disconnect().await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event).await,
                _ = sleep_until(deadline) => self.negotiation_timed_out().await,
            }
        }

        self.release_resources("session dropped").await;
        debug!("Session driver terminated");
    }

    fn phase(&self) -> Phase {
        derive_phase(self.lifecycle, self.link)
    }

    async fn connect(&mut self) {
        if self.config.camera_id.is_empty() {
            warn!("connect() called without a camera id, ignoring");
            return;
        }

        if self.phase() == Phase::Connecting {
            debug!("Connection attempt already in flight");
            return;
        }

        self.release_resources("reconnecting").await;
        let generation = self.generation;
        self.attempt += 1;

        info!(attempt = self.attempt, url = %self.relay_url, "Connecting to relay");

        self.lifecycle = Lifecycle::Active;
        self.link = LinkFlags::default();
        self.loading = true;
        self.error = None;
        self.deadline = self
            .config
            .negotiation_timeout()
            .map(|timeout| Instant::now() + timeout);
        self.publish();

        let tx = self.events_tx.clone();
        let sink = RelaySink::new(move |event| {
            tx.send(SessionEvent {
                generation,
                kind: EventKind::Relay(event),
            })
            .is_ok()
        });
        self.channel = Some(self.connector.open(&self.relay_url, sink));
    }

    async fn disconnect(&mut self) {
        info!("Disconnecting");

        self.release_resources("viewer disconnected").await;
        self.lifecycle = Lifecycle::Disconnected;
        self.loading = false;
        self.error = None;
        self.publish();
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        if event.generation != self.generation {
            debug!(
                generation = event.generation,
                current = self.generation,
                "Dropping event from a released attempt: {:?}",
                event.kind
            );
            return;
        }

        match event.kind {
            EventKind::Relay(event) => self.on_relay_event(event).await,
            EventKind::Negotiation(event) => self.on_negotiation_event(event).await,
        }
    }

    async fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Opened => {
                info!("Relay channel open");
                self.link.channel_open = true;
                self.publish();
                self.start_negotiation().await;
            }
            RelayEvent::Message(text) => self.on_relay_message(&text).await,
            RelayEvent::Error(message) => self.fail(Error::WebSocketError(message)).await,
            RelayEvent::Closed { code, reason } => {
                info!(code, reason = %reason, "Relay channel closed");
                self.release_resources("relay closed").await;
                self.lifecycle = Lifecycle::Disconnected;
                self.loading = false;
                self.publish();
            }
        }
    }

    async fn start_negotiation(&mut self) {
        let generation = self.generation;
        let tx = self.events_tx.clone();
        let sink = NegotiationSink::new(move |event| {
            tx.send(SessionEvent {
                generation,
                kind: EventKind::Negotiation(event),
            })
            .is_ok()
        });

        let negotiator = match self.factory.create(&self.options, sink).await {
            Ok(negotiator) => negotiator,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };

        if self.options.initiator {
            if let Err(e) = negotiator.create_offer().await {
                negotiator.close().await;
                self.fail(e).await;
                return;
            }
        }

        self.negotiator = Some(negotiator);
    }

    async fn on_relay_message(&mut self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse relay message: {}", e);
                self.error = Some((e.kind(), e.to_string()));
                self.loading = false;
                self.publish();
                return;
            }
        };

        match message {
            InboundMessage::CameraInfo(camera) => {
                info!(camera = %camera, "Received camera info");
            }
            InboundMessage::Description(description) => {
                let Some(negotiator) = self.negotiator.as_ref() else {
                    warn!("Remote description arrived before negotiation started, ignoring");
                    return;
                };
                debug!("Received remote {:?}", description.kind);
                let applied = negotiator.apply_remote_description(description).await;
                if let Err(e) = applied {
                    self.fail(e).await;
                }
            }
            InboundMessage::Candidate(candidate) => {
                let Some(negotiator) = self.negotiator.as_ref() else {
                    warn!("Remote candidate arrived before negotiation started, ignoring");
                    return;
                };
                let added = negotiator.add_remote_candidate(candidate).await;
                if let Err(e) = added {
                    warn!("Ignoring remote candidate: {}", e);
                }
            }
            InboundMessage::Error(message) => {
                warn!("Relay reported an error: {}", message);
                self.fail(Error::SignalingError(message)).await;
            }
            InboundMessage::Unknown(value) => {
                debug!("Ignoring unrecognised relay message: {}", value);
            }
        }
    }

    async fn on_negotiation_event(&mut self, event: NegotiationEvent) {
        match event {
            NegotiationEvent::LocalSignal(signal) => {
                let Some(channel) = self.channel.as_ref() else {
                    return;
                };
                let sent = OutboundMessage::from(signal)
                    .to_json()
                    .and_then(|text| channel.send(text));
                if let Err(e) = sent {
                    warn!("Failed to send local signal: {}", e);
                }
            }
            NegotiationEvent::Track(track) => self.on_track(track),
            NegotiationEvent::PeerState(state) => {
                debug!("Peer link state: {:?}", state);
                match state {
                    PeerLinkState::Failed => {
                        self.fail(Error::PeerConnectionError(
                            "peer connection failed".to_string(),
                        ))
                        .await;
                    }
                    PeerLinkState::Closed if self.link.media_ready => {
                        info!("Peer closed the media path");
                        self.release_resources("peer closed").await;
                        self.lifecycle = Lifecycle::Closed;
                        self.loading = false;
                        self.publish();
                    }
                    _ => {}
                }
            }
            NegotiationEvent::Failed(message) => {
                self.fail(Error::PeerConnectionError(message)).await;
            }
        }
    }

    fn on_track(&mut self, track: RemoteTrack) {
        info!(kind = %track.kind(), track_id = %track.id(), "Remote track arrived");

        match self.media.as_ref() {
            Some(stream) => {
                stream.push(track.clone());
                if let Some(sink) = self.media_sink.as_ref() {
                    sink.track_added(&track);
                }
            }
            None => {
                let stream = Arc::new(MediaStream::new(track));
                if let Some(sink) = self.media_sink.as_ref() {
                    sink.attach(&stream);
                }
                self.media = Some(stream);
                self.link.media_ready = true;
                self.loading = false;
                self.deadline = None;
                info!("Media live");
            }
        }

        self.publish();
    }

    async fn negotiation_timed_out(&mut self) {
        self.deadline = None;

        if self.lifecycle == Lifecycle::Active && !self.link.media_ready {
            let timeout = self.config.negotiation_timeout_secs;
            warn!(timeout_secs = timeout, "Negotiation timed out");
            self.fail(Error::OperationTimeout(format!(
                "no media after {}s",
                timeout
            )))
            .await;
        }
    }

    /// End the current attempt as failed
    async fn fail(&mut self, error: Error) {
        warn!(error = %error, kind = ?error.kind(), "Connection attempt failed");

        self.release_resources("attempt failed").await;
        self.lifecycle = Lifecycle::Failed;
        self.loading = false;
        self.error = Some((error.kind(), error.to_string()));
        self.publish();
    }

    /// Tear down negotiator, relay channel and media; invalidates their pending events
    async fn release_resources(&mut self, reason: &str) {
        self.generation += 1;
        self.deadline = None;
        self.link = LinkFlags::default();

        if let Some(negotiator) = self.negotiator.take() {
            negotiator.close().await;
        }

        if let Some(mut channel) = self.channel.take() {
            channel.close(NORMAL_CLOSURE, reason);
        }

        if self.media.take().is_some() {
            if let Some(sink) = self.media_sink.as_ref() {
                sink.detach();
            }
        }
    }

    fn publish(&self) {
        let phase = self.phase();
        let state = ConnectionState {
            media: self.media.as_ref().map(MediaHandle::new),
            connected: phase == Phase::Connected,
            loading: self.loading,
            error: self.error.as_ref().map(|(_, message)| message.clone()),
            error_kind: self.error.as_ref().map(|(kind, _)| *kind),
            phase,
            channel_open: self.link.channel_open,
            media_ready: self.link.media_ready,
            attempt: self.attempt,
        };

        debug!(phase = %phase, loading = self.loading, "Publishing state");
        self.state_tx.send_replace(state);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
