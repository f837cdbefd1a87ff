//! WebRTC signaling types and messages
//!
//! Client messages are JSON objects keyed by `type`:
//!
//! ```text
//! {"type":"offer","sdp":{"sdp":"v=0..."}}
//! {"type":"candidate","candidate":{"candidate":"...","sdpMid":"0","sdpMLineIndex":0}}
//! ```
//!
//! The server answers with `{"type":"answer","sdp":{"type":"answer","sdp":"..."}}`
//! and trickles its own candidates in the same `candidate` shape.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};

/// SDP offer from the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpOffer {
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// Local session description as sent to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(
        rename = "sdpMid",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(
        rename = "sdpMLineIndex",
        default,
        deserialize_with = "lenient_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Message received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Offer(SdpOffer),
    Candidate(IceCandidate),
    /// Well-formed message with a `type` we do not handle
    Unknown(String),
}

/// Message sent to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Answer { sdp: SessionDescription },
    Candidate { candidate: IceCandidate },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Optional candidate string field; values of the wrong type are dropped
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => {
            debug!("Ignoring non-string candidate field: {}", other);
            None
        }
    })
}

/// Optional m-line index; integral floats such as `1.0` are accepted
fn lenient_index<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let index = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .and_then(|i| u16::try_from(i).ok()),
        _ => None,
    };

    if index.is_none() {
        debug!("Ignoring invalid sdpMLineIndex: {}", value);
    }
    Ok(index)
}

/// `type` of any client message
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Client messages we act on
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Offer { sdp: SdpOffer },
    Candidate { candidate: IceCandidate },
    #[serde(other)]
    Other,
}

/// Parse one text frame from the client.
///
/// Offers need a string at `sdp.sdp`; candidates need a string at
/// `candidate.candidate`. Optional candidate fields are kept when they have
/// the right type and dropped otherwise.
pub fn parse_client_message(text: &str) -> Result<ClientMessage> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| AppError::Protocol(format!("invalid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(AppError::Protocol("message is not a JSON object".to_string()));
    }

    let envelope = Envelope::deserialize(&value)
        .map_err(|e| AppError::Protocol(format!("missing or non-string 'type': {}", e)))?;

    match Inbound::deserialize(value) {
        Ok(Inbound::Offer { sdp }) => Ok(ClientMessage::Offer(sdp)),
        Ok(Inbound::Candidate { candidate }) => Ok(ClientMessage::Candidate(candidate)),
        Ok(Inbound::Other) => Ok(ClientMessage::Unknown(envelope.kind)),
        Err(e) => Err(AppError::Protocol(format!(
            "invalid '{}' message: {}",
            envelope.kind, e
        ))),
    }
}

/// Peer connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that end the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
