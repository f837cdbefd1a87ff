//! Viewer sessions and the session registry

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::peer::PeerHandle;

/// Lifecycle of one viewer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Negotiating,
    Connected,
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// One viewer: a peer connection plus its negotiation state.
///
/// The peer handle is closed at most once, whichever path gets there first.
pub struct Session {
    id: String,
    peer: Arc<dyn PeerHandle>,
    state: Mutex<SessionState>,
    peer_closed: AtomicBool,
}

impl Session {
    pub fn new(id: impl Into<String>, peer: Arc<dyn PeerHandle>) -> Self {
        Self {
            id: id.into(),
            peer,
            state: Mutex::new(SessionState::Connecting),
            peer_closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &Arc<dyn PeerHandle> {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Session {} state: {} -> {}", self.id, *current, state);
            *current = state;
        }
    }

    /// Close the peer handle. Returns false if it was already closed.
    pub async fn close_peer(&self) -> bool {
        if self.peer_closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Err(e) = self.peer.close().await {
            warn!("Failed to close peer for session {}: {}", self.id, e);
        }
        debug!("Peer for session {} closed", self.id);
        true
    }
}

/// Registry of active sessions.
///
/// The lock only guards the map; peer teardown always runs outside it.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<Session>) {
        let count = {
            let mut sessions = self.sessions.lock();
            sessions.insert(session.id().to_string(), session.clone());
            sessions.len()
        };
        info!("Session {} added. Total sessions: {}", session.id(), count);
    }

    /// Remove a session. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let (removed, count) = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(id).is_some();
            (removed, sessions.len())
        };

        if removed {
            info!("Session {} removed. Total sessions: {}", id, count);
        } else {
            debug!("Session {} not found in registry", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Close every session's peer. Each session task then sees the peer
    /// close and removes itself.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        if sessions.is_empty() {
            return;
        }

        info!("Closing {} sessions", sessions.len());
        for session in sessions {
            session.close_peer().await;
        }
    }
}
