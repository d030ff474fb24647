//! Media sink that counts received RTP packets per track

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streameasy_viewer::{MediaSink, MediaStream, RemoteTrack};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often each reader logs its counters
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct TrackCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// Reads RTP from every live track and keeps per-track totals
#[derive(Default)]
pub struct PacketCounter {
    counters: Mutex<HashMap<String, Arc<TrackCounters>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl PacketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(track id, packets, bytes)` for every track seen so far
    pub fn totals(&self) -> Vec<(String, u64, u64)> {
        let mut totals: Vec<_> = self
            .counters
            .lock()
            .iter()
            .map(|(id, c)| {
                (
                    id.clone(),
                    c.packets.load(Ordering::Relaxed),
                    c.bytes.load(Ordering::Relaxed),
                )
            })
            .collect();
        totals.sort();
        totals
    }

    /// Log the totals
    pub fn report(&self) {
        for (track_id, packets, bytes) in self.totals() {
            info!(track_id = %track_id, packets, bytes, "Received media totals");
        }
    }

    fn start_reader(&self, track: &RemoteTrack) {
        let counters = Arc::clone(
            self.counters
                .lock()
                .entry(track.id().to_string())
                .or_default(),
        );

        let Some(source) = track.source().cloned() else {
            debug!(track_id = %track.id(), "Track has no RTP source, not counting");
            return;
        };

        let track_id = track.id().to_string();
        let kind = track.kind();

        let reader = tokio::spawn(async move {
            info!(track_id = %track_id, kind = %kind, "Counting RTP packets");
            let mut last_report = Instant::now();

            loop {
                match source.read_rtp().await {
                    Ok((packet, _)) => {
                        let packets = counters.packets.fetch_add(1, Ordering::Relaxed) + 1;
                        let bytes = counters
                            .bytes
                            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed)
                            + packet.payload.len() as u64;

                        if last_report.elapsed() >= REPORT_INTERVAL {
                            info!(track_id = %track_id, kind = %kind, packets, bytes, "Receiving media");
                            last_report = Instant::now();
                        }
                    }
                    Err(e) => {
                        debug!(track_id = %track_id, "RTP reader finished: {}", e);
                        break;
                    }
                }
            }
        });

        self.readers.lock().push(reader);
    }
}

impl MediaSink for PacketCounter {
    fn attach(&self, media: &Arc<MediaStream>) {
        info!(stream_id = %media.stream_id(), "Media attached");
        for track in media.tracks() {
            self.start_reader(&track);
        }
    }

    fn track_added(&self, track: &RemoteTrack) {
        self.start_reader(track);
    }

    fn detach(&self) {
        info!("Media detached");
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streameasy_viewer::TrackKind;

    #[tokio::test]
    async fn test_sourceless_track_is_registered_with_zero_totals() {
        let counter = PacketCounter::new();
        let stream = Arc::new(MediaStream::new(RemoteTrack::new(
            "video-0",
            "stream-1",
            TrackKind::Video,
        )));

        counter.attach(&stream);
        counter.track_added(&RemoteTrack::new("audio-0", "stream-1", TrackKind::Audio));

        assert_eq!(
            counter.totals(),
            vec![
                ("audio-0".to_string(), 0, 0),
                ("video-0".to_string(), 0, 0)
            ]
        );

        counter.detach();
        assert!(counter.readers.lock().is_empty());
    }
}
