//! WebRTC signaling and session orchestration
//!
//! ```text
//! Browser <--- WebSocket (offer/answer/candidate) ---> run_session
//!    ^                                                     |
//!    |                                              PeerHandle (webrtc-rs)
//!    +------------------ RTP (H.264 / Opus) <---- shared MediaTracks
//! ```
//!
//! Every viewer gets its own peer connection; the capture tracks are
//! created once and attached to each peer.

pub mod config;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub(crate) mod fake;

pub use config::WebRtcConfig;
pub use negotiation::{run_session, SessionContext, SignalFrame, TransportError};
pub use peer::{NegotiationEngine, PeerEvent, PeerEventSender, PeerHandle, RtcNegotiationEngine};
pub use session::{Session, SessionRegistry, SessionState};
pub use signaling::{
    parse_client_message, ClientMessage, ConnectionState, IceCandidate, SdpOffer,
    ServerMessage, SessionDescription,
};
