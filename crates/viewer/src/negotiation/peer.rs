//! `webrtc` negotiation engine
//!
//! Wraps one `RTCPeerConnection` configured as the offering side with
//! receive-only audio and video transceivers. Without trickle, the local
//! description is only published once ICE gathering completed, so it already
//! carries every candidate.

use super::{
    LocalSignal, NegotiationEvent, NegotiationOptions, NegotiationSink, Negotiator,
    NegotiatorFactory, PeerLinkState,
};
use crate::media::RemoteTrack;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

/// Candidates held back until the local description has been published
type CandidateBuffer = Arc<Mutex<Option<Vec<IceCandidate>>>>;

/// Builds [`WebRtcNegotiator`]s
#[derive(Debug, Clone, Default)]
pub struct WebRtcNegotiatorFactory;

#[async_trait]
impl NegotiatorFactory for WebRtcNegotiatorFactory {
    async fn create(
        &self,
        options: &NegotiationOptions,
        events: NegotiationSink,
    ) -> Result<Box<dyn Negotiator>> {
        let negotiator = WebRtcNegotiator::new(options, events).await?;
        Ok(Box::new(negotiator))
    }
}

/// Negotiation object backed by a `webrtc` peer connection
pub struct WebRtcNegotiator {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Publish the description before gathering completes
    trickle: bool,

    /// Event sink of the owning session attempt
    events: NegotiationSink,

    /// Local candidates waiting for the description (trickle mode)
    pending_candidates: CandidateBuffer,

    /// Task publishing the current local description
    publish_task: Mutex<Option<JoinHandle<()>>>,

    closed: AtomicBool,
}

impl WebRtcNegotiator {
    /// Create a peer connection for the given options
    #[instrument(skip_all)]
    pub async fn new(options: &NegotiationOptions, events: NegotiationSink) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Creating negotiator: connection_id={}, trickle={}",
            connection_id, options.trickle
        );

        // Opus for audio, VP8/VP9/H.264 for video
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = options
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
            })?);

        // Declare intent to receive; the remote must not be assumed to offer tracks
        let wanted = [
            (options.receive_audio, RTPCodecType::Audio),
            (options.receive_video, RTPCodecType::Video),
        ];
        for kind in wanted.into_iter().filter(|(on, _)| *on).map(|(_, kind)| kind) {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    Error::PeerConnectionError(format!(
                        "Failed to add {:?} transceiver: {}",
                        kind, e
                    ))
                })?;
        }

        let pending_candidates: CandidateBuffer = Arc::new(Mutex::new(Some(Vec::new())));

        register_handlers(
            &peer_connection,
            &connection_id,
            options.trickle,
            &events,
            &pending_candidates,
        );

        Ok(Self {
            connection_id,
            peer_connection,
            trickle: options.trickle,
            events,
            pending_candidates,
            publish_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Publish the local description once it is final
    fn publish_local_description(&self, mut gather_complete: mpsc::Receiver<()>) {
        let peer_connection = Arc::clone(&self.peer_connection);
        let events = self.events.clone();
        let pending = Arc::clone(&self.pending_candidates);
        let trickle = self.trickle;
        let connection_id = self.connection_id.clone();

        let task = tokio::spawn(async move {
            if !trickle {
                let _ = gather_complete.recv().await;
                debug!("ICE gathering complete for {}", connection_id);
            }

            let description = match peer_connection.local_description().await {
                Some(desc) => desc,
                None => {
                    events.emit(NegotiationEvent::Failed(
                        "No local description after gathering".to_string(),
                    ));
                    return;
                }
            };

            match to_session_description(description) {
                Ok(desc) => {
                    debug!("Publishing local {:?} for {}", desc.kind, connection_id);
                    events.emit(NegotiationEvent::LocalSignal(LocalSignal::Description(desc)));
                    flush_candidates(&pending, &events);
                }
                Err(e) => {
                    events.emit(NegotiationEvent::Failed(e.to_string()));
                }
            }
        });

        if let Some(previous) = self.publish_task.lock().replace(task) {
            previous.abort();
        }
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn create_offer(&self) -> Result<()> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        let gather_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.publish_local_description(gather_complete);

        debug!("Created SDP offer for {}", self.connection_id);
        Ok(())
    }

    async fn apply_remote_description(&self, description: SessionDescription) -> Result<()> {
        debug!(
            "Applying remote {:?} for {}",
            description.kind, self.connection_id
        );

        match description.kind {
            SdpKind::Answer => {
                let answer = RTCSessionDescription::answer(description.sdp)
                    .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

                self.peer_connection
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| {
                        Error::SdpError(format!("Failed to set remote description: {}", e))
                    })?;
            }
            SdpKind::Offer => {
                let offer = RTCSessionDescription::offer(description.sdp)
                    .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

                self.peer_connection
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| {
                        Error::SdpError(format!("Failed to set remote description: {}", e))
                    })?;

                let answer = self
                    .peer_connection
                    .create_answer(None)
                    .await
                    .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

                let gather_complete = self.peer_connection.gathering_complete_promise().await;

                self.peer_connection
                    .set_local_description(answer)
                    .await
                    .map_err(|e| {
                        Error::SdpError(format!("Failed to set local description: {}", e))
                    })?;

                self.publish_local_description(gather_complete);
            }
        }

        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!(
            "Adding ICE candidate for {}: {}",
            self.connection_id, candidate.candidate
        );

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Closing negotiator {}", self.connection_id);

        if let Some(task) = self.publish_task.lock().take() {
            task.abort();
        }

        if let Err(e) = self.peer_connection.close().await {
            warn!("Failed to close peer connection {}: {}", self.connection_id, e);
        }
    }
}

impl Drop for WebRtcNegotiator {
    fn drop(&mut self) {
        if let Some(task) = self.publish_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Wire peer connection callbacks to the event sink
fn register_handlers(
    peer_connection: &RTCPeerConnection,
    connection_id: &str,
    trickle: bool,
    events: &NegotiationSink,
    pending: &CandidateBuffer,
) {
    let sink = events.clone();
    let id = connection_id.to_string();
    peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
        let sink = sink.clone();
        let id = id.clone();
        Box::pin(async move {
            info!(
                "Remote {:?} track {} arrived on {}",
                track.kind(),
                track.id(),
                id
            );
            sink.emit(NegotiationEvent::Track(RemoteTrack::from_webrtc(track)));
        })
    }));

    let sink = events.clone();
    let id = connection_id.to_string();
    peer_connection.on_peer_connection_state_change(Box::new(
        move |s: RTCPeerConnectionState| {
            let sink = sink.clone();
            let id = id.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::New => PeerLinkState::New,
                    RTCPeerConnectionState::Connecting => PeerLinkState::Connecting,
                    RTCPeerConnectionState::Connected => PeerLinkState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerLinkState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerLinkState::Failed,
                    RTCPeerConnectionState::Closed => PeerLinkState::Closed,
                    _ => return,
                };
                debug!("Peer connection {} state: {:?}", id, state);
                sink.emit(NegotiationEvent::PeerState(state));
            })
        },
    ));

    if !trickle {
        return;
    }

    let sink = events.clone();
    let pending = Arc::clone(pending);
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        let pending = Arc::clone(&pending);
        Box::pin(async move {
            // `None` marks the end of gathering
            let Some(candidate) = candidate else {
                return;
            };

            let init = match candidate.to_json() {
                Ok(init) => init,
                Err(e) => {
                    warn!("Failed to serialize local ICE candidate: {}", e);
                    return;
                }
            };

            let candidate = IceCandidate {
                candidate: init.candidate,
                sdp_mid: init.sdp_mid,
                sdp_mline_index: init.sdp_mline_index,
            };

            let forward = match pending.lock().as_mut() {
                Some(buffer) => {
                    buffer.push(candidate);
                    None
                }
                None => Some(candidate),
            };

            if let Some(candidate) = forward {
                sink.emit(NegotiationEvent::LocalSignal(LocalSignal::Candidate(candidate)));
            }
        })
    }));
}

/// Send buffered candidates and switch to direct forwarding
fn flush_candidates(pending: &CandidateBuffer, events: &NegotiationSink) {
    let buffered = pending.lock().take().unwrap_or_default();
    for candidate in buffered {
        events.emit(NegotiationEvent::LocalSignal(LocalSignal::Candidate(candidate)));
    }
}

fn to_session_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(Error::SdpError(format!(
                "Unexpected local description type: {:?}",
                other
            )))
        }
    };

    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}
