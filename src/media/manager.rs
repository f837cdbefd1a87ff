//! Shared media session ownership
//!
//! Capture devices are opened once per process. Every viewer attaches the
//! same tracks, so the manager is the single owner that opens them (with
//! retries) and closes them at shutdown.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::CaptureEngine;
use super::resolver::ResolvedConfig;
use super::track::{close_tracks, MediaStream, SharedTrack};
use super::types::{
    AudioCodecParams, AudioConstraints, MediaConstraints, VideoCodecParams, VideoConstraints,
};
use crate::config::{CaptureConfig, DEFAULT_CAPTURE_RETRIES, DEFAULT_CAPTURE_RETRY_DELAY_SECS};
use crate::error::{AppError, Result};

/// Acquisition retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CAPTURE_RETRIES,
            delay: Duration::from_secs(DEFAULT_CAPTURE_RETRY_DELAY_SECS),
        }
    }
}

/// Acquired tracks plus the per-kind selection
pub struct SharedMediaSession {
    tracks: Vec<SharedTrack>,
    video: Option<SharedTrack>,
    audio: Option<SharedTrack>,
}

impl SharedMediaSession {
    /// Select the first track of each requested kind.
    ///
    /// A requested kind with no track is disabled. Fails when nothing
    /// requested produced a track; the caller still owns the stream then.
    fn select(stream: &MediaStream, want_video: bool, want_audio: bool) -> Result<Self> {
        let video = if want_video {
            let found = stream.video_tracks().into_iter().next();
            if found.is_none() {
                warn!("No video track in acquired stream, disabling video");
            }
            found
        } else {
            None
        };

        let audio = if want_audio {
            let found = stream.audio_tracks().into_iter().next();
            if found.is_none() {
                warn!("No audio track in acquired stream, disabling audio");
            }
            found
        } else {
            None
        };

        if video.is_none() && audio.is_none() {
            return Err(AppError::Capture(
                "acquired stream has no usable video or audio track".to_string(),
            ));
        }

        Ok(Self {
            tracks: stream.tracks().to_vec(),
            video,
            audio,
        })
    }

    pub fn video_enabled(&self) -> bool {
        self.video.is_some()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }
}

/// Owner of the process-wide capture session
pub struct MediaManager {
    engine: Arc<dyn CaptureEngine>,
    policy: RetryPolicy,
    video_params: VideoCodecParams,
    audio_params: AudioCodecParams,
    session: RwLock<Option<SharedMediaSession>>,
    initialized: AtomicBool,
}

impl MediaManager {
    pub fn new(engine: Arc<dyn CaptureEngine>, policy: RetryPolicy) -> Self {
        Self {
            engine,
            policy,
            video_params: VideoCodecParams::default(),
            audio_params: AudioCodecParams::default(),
            session: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Build a manager with codec profiles and retry policy from config
    pub fn from_config(engine: Arc<dyn CaptureEngine>, config: &CaptureConfig) -> Self {
        let policy = RetryPolicy {
            attempts: config.retries.max(1),
            delay: config.retry_delay(),
        };

        let mut manager = Self::new(engine, policy);
        manager.video_params = VideoCodecParams {
            bitrate: config.video_bitrate,
            width: config.width,
            height: config.height,
            fps: config.fps,
        };
        manager.audio_params = AudioCodecParams {
            bitrate: config.audio_bitrate,
            ..AudioCodecParams::default()
        };
        manager
    }

    /// Open the shared capture session.
    ///
    /// Retries per the policy; tracks left over from a failed attempt are
    /// closed before the next one. Only one successful call is allowed.
    pub async fn initialize(&self, config: &ResolvedConfig) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(AppError::Config(
                "media manager already initialized".to_string(),
            ));
        }

        match self.acquire(config).await {
            Ok(session) => {
                info!(
                    "Shared media session ready (video: {}, audio: {})",
                    session.video_enabled(),
                    session.audio_enabled()
                );
                *self.session.write() = Some(session);
                Ok(())
            }
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn acquire(&self, config: &ResolvedConfig) -> Result<SharedMediaSession> {
        let constraints = self.constraints_for(config);
        if constraints.is_empty() {
            return Err(AppError::Config(
                "no video or audio device selected".to_string(),
            ));
        }

        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(
                "Acquiring {} (attempt {}/{})",
                constraints.describe(),
                attempt,
                attempts
            );

            match self.engine.get_user_media(&constraints).await {
                Ok(stream) => {
                    return SharedMediaSession::select(
                        &stream,
                        constraints.video.is_some(),
                        constraints.audio.is_some(),
                    )
                    .inspect_err(|_| stream.close_all());
                }
                Err(e) => {
                    warn!("Media acquisition attempt {} failed: {}", attempt, e);
                    if !e.partial.is_empty() {
                        debug!("Closing {} partially acquired tracks", e.partial.len());
                        close_tracks(&e.partial);
                    }
                    last_error = e.message;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(AppError::Acquisition {
            attempts,
            reason: last_error,
        })
    }

    fn constraints_for(&self, config: &ResolvedConfig) -> MediaConstraints {
        MediaConstraints {
            video: config.video_device_id.as_ref().map(|id| VideoConstraints {
                device_id: id.clone(),
                params: self.video_params.clone(),
            }),
            audio: config.audio_device_id.as_ref().map(|id| AudioConstraints {
                device_id: id.clone(),
                params: self.audio_params.clone(),
            }),
        }
    }

    pub fn video_track(&self) -> Option<SharedTrack> {
        self.session.read().as_ref().and_then(|s| s.video.clone())
    }

    pub fn audio_track(&self) -> Option<SharedTrack> {
        self.session.read().as_ref().and_then(|s| s.audio.clone())
    }

    pub fn is_video_enabled(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.video_enabled())
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.audio_enabled())
    }

    /// Enabled tracks, video first
    pub fn tracks(&self) -> Vec<SharedTrack> {
        let guard = self.session.read();
        match guard.as_ref() {
            Some(s) => s.video.iter().chain(s.audio.iter()).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Close every acquired track. Safe to call repeatedly.
    pub fn close(&self) {
        let session = self.session.write().take();
        if let Some(session) = session {
            info!("Closing shared media session");
            close_tracks(&session.tracks);
        }
    }
}
