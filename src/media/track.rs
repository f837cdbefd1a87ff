//! Shared media tracks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::types::DeviceKind;
use crate::error::Result;

/// Stream id shared by every track produced by this process
pub const STREAM_ID: &str = "avshare";

/// An encoded media track that can be attached to many peer connections.
///
/// Closing stops the producer and releases the device. It happens once;
/// further calls are no-ops.
pub trait MediaTrack: Send + Sync {
    /// Track id
    fn id(&self) -> &str;

    /// Kind of device this track was captured from
    fn kind(&self) -> DeviceKind;

    /// Track handle to attach to a peer connection
    fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync>;

    /// Stop producing and release the device
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

pub type SharedTrack = Arc<dyn MediaTrack>;

/// Tracks returned by one capture request
#[derive(Clone, Default)]
pub struct MediaStream {
    tracks: Vec<SharedTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<SharedTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[SharedTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> Vec<SharedTrack> {
        self.tracks_of(DeviceKind::VideoInput)
    }

    pub fn audio_tracks(&self) -> Vec<SharedTrack> {
        self.tracks_of(DeviceKind::AudioInput)
    }

    fn tracks_of(&self, kind: DeviceKind) -> Vec<SharedTrack> {
        self.tracks
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Close every track, logging failures
    pub fn close_all(&self) {
        close_tracks(&self.tracks);
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| t.id()))
            .finish()
    }
}

/// Close a set of tracks, logging failures
pub fn close_tracks(tracks: &[SharedTrack]) {
    for track in tracks {
        if let Err(e) = track.close() {
            warn!("Failed to close track {}: {}", track.id(), e);
        }
    }
}

/// Track backed by a `TrackLocalStaticSample`, fed by a capture loop.
///
/// The capture loop polls `stop_flag()` and exits once it is set.
pub struct SampleTrack {
    id: String,
    kind: DeviceKind,
    track: Arc<TrackLocalStaticSample>,
    stop_flag: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl SampleTrack {
    pub fn new(id: impl Into<String>, kind: DeviceKind, capability: RTCRtpCodecCapability) -> Self {
        let id = id.into();
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            STREAM_ID.to_string(),
        ));

        Self {
            id,
            kind,
            track,
            stop_flag: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// Sample sink for the capture loop
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Flag the capture loop watches
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }
}

impl MediaTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        debug!("Track {} closed", self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability() -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let track = SampleTrack::new("audio0", DeviceKind::AudioInput, capability());
        let stop = track.stop_flag();

        assert!(!track.is_closed());
        track.close().unwrap();
        track.close().unwrap();
        assert!(track.is_closed());
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stream_filters_by_kind() {
        let audio: SharedTrack =
            Arc::new(SampleTrack::new("audio0", DeviceKind::AudioInput, capability()));
        let stream = MediaStream::new(vec![audio]);

        assert_eq!(stream.audio_tracks().len(), 1);
        assert!(stream.video_tracks().is_empty());

        stream.close_all();
        assert!(stream.tracks()[0].is_closed());
    }
}
