//! WebRTC configuration

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::config::{StreamConfig, DEFAULT_STUN_SERVER};

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

impl From<&StreamConfig> for WebRtcConfig {
    fn from(stream: &StreamConfig) -> Self {
        Self {
            stun_servers: stream.stun_servers.clone(),
        }
    }
}

impl WebRtcConfig {
    /// ICE servers for a peer connection; blank URLs are skipped
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.stun_servers
            .iter()
            .filter(|url| !url.trim().is_empty())
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect()
    }
}
