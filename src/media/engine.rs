//! Capture/encode engine

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use super::track::{MediaStream, SharedTrack};
use super::types::{DeviceInfo, MediaConstraints};
use crate::audio::{self, OpusCaptureTrack};
use crate::video::{self, H264CaptureTrack};

/// A failed capture request.
///
/// Tracks that were opened before the failure are handed back in `partial`;
/// the caller owns them and must close them.
#[derive(Error)]
#[error("{message}")]
pub struct CaptureError {
    pub message: String,
    pub partial: Vec<SharedTrack>,
}

impl CaptureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial: Vec::new(),
        }
    }

    pub fn with_partial(message: impl Into<String>, partial: Vec<SharedTrack>) -> Self {
        Self {
            message: message.into(),
            partial,
        }
    }
}

impl std::fmt::Debug for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureError")
            .field("message", &self.message)
            .field("partial", &self.partial.len())
            .finish()
    }
}

/// Opens capture devices and produces encoded tracks
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Snapshot of the available capture devices
    fn enumerate_devices(&self) -> Vec<DeviceInfo>;

    /// Open the requested devices and start producing tracks
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<MediaStream, CaptureError>;
}

/// V4L2/H.264 video and ALSA/Opus audio
#[derive(Debug, Default)]
pub struct SystemCaptureEngine;

impl SystemCaptureEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureEngine for SystemCaptureEngine {
    fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        match video::enumerate_video_devices() {
            Ok(found) => devices.extend(found),
            Err(e) => warn!("Video device enumeration failed: {}", e),
        }
        match audio::enumerate_audio_devices() {
            Ok(found) => devices.extend(found),
            Err(e) => warn!("Audio device enumeration failed: {}", e),
        }

        info!("Enumerated {} capture devices", devices.len());
        devices
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<MediaStream, CaptureError> {
        if constraints.is_empty() {
            return Err(CaptureError::new("no devices requested"));
        }

        let mut tracks: Vec<SharedTrack> = Vec::new();

        if let Some(ref video) = constraints.video {
            let track = H264CaptureTrack::open(&video.device_id, &video.params)
                .await
                .map_err(|e| CaptureError::new(e.to_string()))?;
            tracks.push(track);
        }

        if let Some(ref audio) = constraints.audio {
            match OpusCaptureTrack::open(&audio.device_id, &audio.params).await {
                Ok(track) => tracks.push(track),
                Err(e) => return Err(CaptureError::with_partial(e.to_string(), tracks)),
            }
        }

        Ok(MediaStream::new(tracks))
    }
}
