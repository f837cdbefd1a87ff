use std::sync::Arc;

use crate::config::AppConfig;
use crate::media::MediaManager;
use crate::webrtc::{NegotiationEngine, SessionContext, SessionRegistry};

/// Application-wide state shared across handlers
pub struct AppState {
    pub config: AppConfig,
    /// Owner of the shared capture tracks
    pub media: Arc<MediaManager>,
    /// Active viewer sessions
    pub registry: Arc<SessionRegistry>,
    /// Creates one peer connection per viewer
    pub engine: Arc<dyn NegotiationEngine>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        media: Arc<MediaManager>,
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn NegotiationEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            media,
            registry,
            engine,
        })
    }

    /// Context for a new signaling session, carrying the current tracks
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            engine: self.engine.clone(),
            registry: self.registry.clone(),
            tracks: self.media.tracks(),
            ice_gather_timeout: self.config.stream.ice_gather_timeout(),
        }
    }

    /// Close every session, then release the capture devices
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        self.media.close();
    }
}
