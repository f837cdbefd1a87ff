//! Device and codec descriptions

use serde::{Deserialize, Serialize};

/// Kind of capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
}

impl DeviceKind {
    /// Short name used in log and error messages
    pub fn media_name(&self) -> &'static str {
        match self {
            DeviceKind::AudioInput => "Audio",
            DeviceKind::VideoInput => "Video",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::AudioInput => write!(f, "AudioInput"),
            DeviceKind::VideoInput => write!(f, "VideoInput"),
        }
    }
}

/// Enumerated capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform device identifier (e.g. `/dev/video0`, `hw:1,0`)
    pub device_id: String,
    /// Human-readable label, hex-encoded on some platforms
    pub label: String,
    /// Device kind
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// H.264 video codec profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCodecParams {
    /// Target bitrate in bps
    pub bitrate: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoCodecParams {
    fn default() -> Self {
        Self {
            bitrate: 1_500_000,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Opus audio codec profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCodecParams {
    /// Target bitrate in bps
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioCodecParams {
    fn default() -> Self {
        Self {
            bitrate: 64_000,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub device_id: String,
    pub params: VideoCodecParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub device_id: String,
    pub params: AudioCodecParams,
}

/// What to open on a capture request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl MediaConstraints {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// Describe the request for logging
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref video) = self.video {
            parts.push(format!("video from '{}'", video.device_id));
        }
        if let Some(ref audio) = self.audio {
            parts.push(format!("audio from '{}'", audio.device_id));
        }
        parts.join(" and ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(DeviceKind::VideoInput.to_string(), "VideoInput");
        assert_eq!(DeviceKind::AudioInput.to_string(), "AudioInput");
        assert_eq!(DeviceKind::AudioInput.media_name(), "Audio");
    }

    #[test]
    fn test_constraints_describe() {
        let constraints = MediaConstraints {
            video: Some(VideoConstraints {
                device_id: "/dev/video0".into(),
                params: VideoCodecParams::default(),
            }),
            audio: Some(AudioConstraints {
                device_id: "hw:1,0".into(),
                params: AudioCodecParams::default(),
            }),
        };
        assert_eq!(
            constraints.describe(),
            "video from '/dev/video0' and audio from 'hw:1,0'"
        );
        assert!(MediaConstraints::default().is_empty());
    }
}
