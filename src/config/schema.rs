use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Number of capture attempts before giving up
pub const DEFAULT_CAPTURE_RETRIES: u32 = 5;

/// Delay between capture attempts in seconds
pub const DEFAULT_CAPTURE_RETRY_DELAY_SECS: u64 = 5;

/// Time to wait for ICE gathering before sending the answer (ms)
pub const DEFAULT_ICE_GATHER_TIMEOUT_MS: u64 = 5000;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture device and codec settings
    pub capture: CaptureConfig,
    /// WebRTC negotiation settings
    pub stream: StreamConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Video device identifier (id, label or hex-encoded label)
    pub video_identifier: Option<String>,
    /// Audio device identifier (id, label or hex-encoded label)
    pub audio_identifier: Option<String>,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Capture frame rate
    pub fps: u32,
    /// Video bitrate in bps
    pub video_bitrate: u32,
    /// Audio bitrate in bps
    pub audio_bitrate: u32,
    /// Acquisition attempts
    pub retries: u32,
    /// Delay between acquisition attempts in seconds
    pub retry_delay_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_identifier: None,
            audio_identifier: None,
            width: 640,
            height: 480,
            fps: 30,
            video_bitrate: 1_500_000,
            audio_bitrate: 64_000,
            retries: DEFAULT_CAPTURE_RETRIES,
            retry_delay_secs: DEFAULT_CAPTURE_RETRY_DELAY_SECS,
        }
    }
}

impl CaptureConfig {
    /// Delay between acquisition attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Streaming (WebRTC) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// ICE gathering timeout for the answer (ms)
    pub ice_gather_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            ice_gather_timeout_ms: DEFAULT_ICE_GATHER_TIMEOUT_MS,
        }
    }
}

impl StreamConfig {
    /// ICE gathering timeout
    pub fn ice_gather_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gather_timeout_ms)
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
    /// Viewer page served at `/`
    pub client_html: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "0.0.0.0".to_string(),
            client_html: PathBuf::from("./client.html"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.capture.retries, 5);
        assert_eq!(config.capture.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.stream.ice_gather_timeout(), Duration::from_secs(5));
        assert_eq!(config.stream.stun_servers, vec![DEFAULT_STUN_SERVER]);
        assert_eq!(config.web.http_port, 8080);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"web":{"http_port":9000}}"#).unwrap();
        assert_eq!(config.web.http_port, 9000);
        assert_eq!(config.web.bind_address, "0.0.0.0");
        assert_eq!(config.capture.fps, 30);
    }
}
