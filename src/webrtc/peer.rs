//! WebRTC peer connection management
//!
//! Sessions talk to the engine through [`NegotiationEngine`] and
//! [`PeerHandle`]. Engine callbacks are delivered as [`PeerEvent`]s on the
//! session's queue instead of writing to the socket directly.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::config::WebRtcConfig;
use super::signaling::{ConnectionState, IceCandidate, SdpOffer, SessionDescription};
use crate::error::{AppError, Result};
use crate::media::SharedTrack;

/// Event raised by a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate was gathered; `None` marks the end of gathering
    LocalCandidate(Option<IceCandidate>),
    StateChanged(ConnectionState),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// One peer connection, owned by one session
#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn set_remote_description(&self, offer: SdpOffer) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Resolves once ICE gathering completes. Must be obtained before
    /// `set_local_description` starts gathering.
    async fn gathering_complete(&self) -> mpsc::Receiver<()>;

    async fn set_local_description(&self, answer: SessionDescription) -> Result<()>;

    /// Current local description, including candidates gathered so far
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a shared track; the source is not modified
    async fn add_track(&self, track: SharedTrack) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates peer connections
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_peer(
        &self,
        session_id: &str,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerHandle>>;
}

/// [`NegotiationEngine`] backed by webrtc-rs
pub struct RtcNegotiationEngine {
    config: WebRtcConfig,
}

impl RtcNegotiationEngine {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NegotiationEngine for RtcNegotiationEngine {
    async fn create_peer(
        &self,
        session_id: &str,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerHandle>> {
        let peer = RtcPeer::new(&self.config, session_id, events).await?;
        Ok(Arc::new(peer))
    }
}

fn connection_state_from(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Peer connection wrapper with event forwarding
pub struct RtcPeer {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl RtcPeer {
    pub async fn new(
        config: &WebRtcConfig,
        session_id: &str,
        events: PeerEventSender,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let peer = Self {
            session_id: session_id.to_string(),
            pc: Arc::new(pc),
            closed: AtomicBool::new(false),
        };
        peer.setup_event_handlers(events);

        Ok(peer)
    }

    fn setup_event_handlers(&self, events: PeerEventSender) {
        let session_id = self.session_id.clone();
        let state_events = events.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                if let Some(new_state) = connection_state_from(s) {
                    info!("Peer {} connection state: {}", session_id, new_state);
                    let _ = state_events.send(PeerEvent::StateChanged(new_state));
                }
                Box::pin(async {})
            }));

        let session_id = self.session_id.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let event = match candidate.map(|c| c.to_json()) {
                    Some(Ok(init)) => {
                        debug!("Peer {} local candidate: {}", session_id, init.candidate);
                        Some(PeerEvent::LocalCandidate(Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        })))
                    }
                    Some(Err(e)) => {
                        warn!("Peer {} failed to serialize candidate: {}", session_id, e);
                        None
                    }
                    None => Some(PeerEvent::LocalCandidate(None)),
                };

                if let Some(event) = event {
                    let _ = events.send(event);
                }
                Box::pin(async {})
            }));
    }
}

#[async_trait]
impl PeerHandle for RtcPeer {
    async fn set_remote_description(&self, offer: SdpOffer) -> Result<()> {
        let sdp = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::WebRtcError(format!("Invalid SDP offer: {}", e)))?;

        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn gathering_complete(&self) -> mpsc::Receiver<()> {
        self.pc.gathering_complete_promise().await
    }

    async fn set_local_description(&self, answer: SessionDescription) -> Result<()> {
        let sdp = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| AppError::WebRtcError(format!("Invalid SDP answer: {}", e)))?;

        self.pc.set_local_description(sdp).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set local description: {}", e))
        })
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(|desc| SessionDescription {
            sdp_type: desc.sdp_type.to_string(),
            sdp: desc.sdp,
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, track: SharedTrack) -> Result<()> {
        let sender = self.pc.add_track(track.track_local()).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to add track {}: {}", track.id(), e))
        })?;

        // Drain RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        debug!("Peer {} attached track {}", self.session_id, track.id());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}
