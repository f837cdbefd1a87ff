//! In-memory peer and engine for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::peer::{NegotiationEngine, PeerEvent, PeerEventSender, PeerHandle};
use super::signaling::{IceCandidate, SdpOffer, SessionDescription};
use crate::error::{AppError, Result};
use crate::media::SharedTrack;

/// How the fake reports ICE gathering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gathering {
    /// Completes as soon as it is requested
    Immediate,
    /// Never completes while the peer is alive
    Never,
}

pub struct FakePeer {
    pub id: String,
    gathering: Gathering,
    pub remote: Mutex<Option<SdpOffer>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub tracks: Mutex<Vec<SharedTrack>>,
    pub close_calls: AtomicUsize,
    pub offers: AtomicUsize,
    /// Held so `Gathering::Never` receivers stay pending
    gather_senders: Mutex<Vec<mpsc::Sender<()>>>,
}

impl FakePeer {
    pub fn new(id: &str, gathering: Gathering) -> Self {
        Self {
            id: id.to_string(),
            gathering,
            remote: Mutex::new(None),
            local: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            offers: AtomicUsize::new(0),
            gather_senders: Mutex::new(Vec::new()),
        }
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    async fn set_remote_description(&self, offer: SdpOffer) -> Result<()> {
        if offer.sdp.is_empty() {
            return Err(AppError::WebRtcError("empty SDP".to_string()));
        }
        self.offers.fetch_add(1, Ordering::SeqCst);
        *self.remote.lock() = Some(offer);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let n = self.offers.load(Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("answer-{}-{}", self.id, n)))
    }

    async fn gathering_complete(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        match self.gathering {
            Gathering::Immediate => drop(tx),
            Gathering::Never => self.gather_senders.lock().push(tx),
        }
        rx
    }

    async fn set_local_description(&self, answer: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(answer);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate == "bad" {
            return Err(AppError::WebRtcError("rejected candidate".to_string()));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: SharedTrack) -> Result<()> {
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.gather_senders.lock().clear();
        Ok(())
    }
}

/// Engine that hands out [`FakePeer`]s and keeps their event senders
pub struct FakeEngine {
    gathering: Gathering,
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    pub events: Mutex<Vec<PeerEventSender>>,
}

impl FakeEngine {
    pub fn new(gathering: Gathering) -> Arc<Self> {
        Arc::new(Self {
            gathering,
            peers: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn peer(&self, index: usize) -> Option<Arc<FakePeer>> {
        self.peers.lock().get(index).cloned()
    }

    /// Raise an engine event on the session behind peer `index`
    pub fn emit(&self, index: usize, event: PeerEvent) {
        if let Some(tx) = self.events.lock().get(index) {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn create_peer(
        &self,
        session_id: &str,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerHandle>> {
        let peer = Arc::new(FakePeer::new(session_id, self.gathering));
        self.peers.lock().push(peer.clone());
        self.events.lock().push(events);
        Ok(peer)
    }
}

/// A video and an audio track, as the media manager would hand out
pub fn shared_tracks() -> Vec<SharedTrack> {
    use crate::media::{DeviceKind, SampleTrack};
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    let video = SampleTrack::new(
        "video",
        DeviceKind::VideoInput,
        RTCRtpCodecCapability {
            mime_type: "video/H264".to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
    );
    let audio = SampleTrack::new(
        "audio",
        DeviceKind::AudioInput,
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    );
    vec![Arc::new(video), Arc::new(audio)]
}
