//! Remote media handles and the rendering attachment point

use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Kind of a remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// An inbound track delivered by the negotiation engine
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    stream_id: String,
    kind: TrackKind,
    source: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    /// Describe a track without an RTP source (engines that render elsewhere, tests)
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            source: None,
        }
    }

    /// Wrap a `webrtc` remote track
    pub fn from_webrtc(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().into(),
            source: Some(track),
        }
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the stream the remote grouped this track into
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Audio or video
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Underlying RTP source, if the engine provides one
    pub fn source(&self) -> Option<&Arc<TrackRemote>> {
        self.source.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

/// Live inbound media of one connection attempt
///
/// Owned by the signaling session; consumers hold a [`MediaHandle`].
#[derive(Debug)]
pub struct MediaStream {
    stream_id: String,
    tracks: RwLock<Vec<RemoteTrack>>,
}

impl MediaStream {
    /// Start a stream from its first track
    pub fn new(first: RemoteTrack) -> Self {
        Self {
            stream_id: first.stream_id().to_string(),
            tracks: RwLock::new(vec![first]),
        }
    }

    /// Stream identifier (taken from the first track)
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Snapshot of the tracks received so far
    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    /// Number of tracks received so far
    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }

    /// Whether a track of the given kind has arrived
    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.read().iter().any(|t| t.kind() == kind)
    }

    pub(crate) fn push(&self, track: RemoteTrack) {
        self.tracks.write().push(track);
    }
}

/// Weak reference to the session-owned media stream
///
/// Upgrading fails once the session tears the media down.
#[derive(Clone)]
pub struct MediaHandle(Weak<MediaStream>);

impl MediaHandle {
    pub(crate) fn new(stream: &Arc<MediaStream>) -> Self {
        Self(Arc::downgrade(stream))
    }

    /// Get the stream if it is still live
    pub fn upgrade(&self) -> Option<Arc<MediaStream>> {
        self.0.upgrade()
    }

    /// Whether the session still holds the stream
    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl PartialEq for MediaHandle {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(stream) => f
                .debug_struct("MediaHandle")
                .field("stream_id", &stream.stream_id())
                .field("tracks", &stream.track_count())
                .finish(),
            None => f.write_str("MediaHandle(<released>)"),
        }
    }
}

/// Rendering attachment point for live media
///
/// Called from the session driver; implementations must not block.
pub trait MediaSink: Send + Sync {
    /// Media became live (first track arrived)
    fn attach(&self, media: &Arc<MediaStream>);

    /// A further track joined the already attached stream
    fn track_added(&self, _track: &RemoteTrack) {}

    /// Media was torn down
    fn detach(&self);
}
