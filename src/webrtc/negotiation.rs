//! Per-viewer negotiation loop
//!
//! Each signaling connection gets one task running [`run_session`]. The task
//! owns the outbound half of the socket, so every write comes from one place:
//!
//! ```text
//! inbound frames ---+
//! peer events   ----+--> select! --> outbound frames
//! answer race   ----+
//! ```

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::peer::{NegotiationEngine, PeerEvent};
use super::session::{Session, SessionRegistry, SessionState};
use super::signaling::{
    parse_client_message, ClientMessage, ConnectionState, SdpOffer, ServerMessage,
};
use crate::error::Result;
use crate::media::SharedTrack;

/// One frame read from the signaling socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalFrame {
    Text(String),
    Close,
}

/// Socket read failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    expected: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>, expected: bool) -> Self {
        Self {
            message: message.into(),
            expected,
        }
    }

    /// Classify from the error text. Resets, closed sockets and EOF are the
    /// normal ways a browser tab goes away.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let expected = ["reset", "closed", "eof", "broken pipe"]
            .iter()
            .any(|pat| lower.contains(pat));
        Self { message, expected }
    }

    pub fn is_expected(&self) -> bool {
        self.expected
    }
}

/// Everything a session task needs from the server
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<dyn NegotiationEngine>,
    pub registry: Arc<SessionRegistry>,
    /// Shared tracks attached to every new peer
    pub tracks: Vec<SharedTrack>,
    pub ice_gather_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatherOutcome {
    Complete,
    TimedOut,
}

type AnswerRace = Pin<Box<dyn Future<Output = GatherOutcome> + Send>>;

async fn wait_race(race: &mut Option<AnswerRace>) -> GatherOutcome {
    match race {
        Some(race) => race.await,
        None => std::future::pending().await,
    }
}

/// Why the loop stopped
#[derive(Debug)]
enum EndReason {
    ClientClosed,
    StreamEnded,
    Transport(TransportError),
    SendFailed,
    PeerState(ConnectionState),
    EngineGone,
}

/// Run one signaling session until the client or the peer goes away.
///
/// Fails only when no peer could be created; everything after that is
/// logged and ends in the same teardown.
pub async fn run_session<R, W>(ctx: SessionContext, mut inbound: R, mut outbound: W) -> Result<()>
where
    R: Stream<Item = std::result::Result<SignalFrame, TransportError>> + Unpin + Send,
    W: Sink<String> + Unpin + Send,
    W::Error: Display,
{
    let session_id = uuid::Uuid::new_v4().to_string();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let peer = match ctx.engine.create_peer(&session_id, events_tx).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!("Failed to create peer for session {}: {}", session_id, e);
            let _ = outbound.close().await;
            return Err(e);
        }
    };

    let mut attached = 0;
    for track in &ctx.tracks {
        match peer.add_track(track.clone()).await {
            Ok(()) => attached += 1,
            Err(e) => warn!("Session {}: failed to attach track {}: {}", session_id, track.id(), e),
        }
    }
    if attached == 0 {
        warn!("Session {} has no media tracks attached", session_id);
    }

    let session = Arc::new(Session::new(session_id, peer));
    ctx.registry.add(session.clone());

    let mut pending: Option<AnswerRace> = None;

    let reason = loop {
        tokio::select! {
            frame = inbound.next() => {
                match frame {
                    Some(Ok(SignalFrame::Text(text))) => {
                        handle_text(&session, &text, ctx.ice_gather_timeout, &mut pending).await;
                    }
                    Some(Ok(SignalFrame::Close)) => break EndReason::ClientClosed,
                    Some(Err(e)) => break EndReason::Transport(e),
                    None => break EndReason::StreamEnded,
                }
            }

            event = events_rx.recv() => {
                match event {
                    Some(PeerEvent::LocalCandidate(Some(candidate))) => {
                        let msg = ServerMessage::Candidate { candidate };
                        if !send_message(&mut outbound, session.id(), &msg).await {
                            break EndReason::SendFailed;
                        }
                    }
                    Some(PeerEvent::LocalCandidate(None)) => {
                        debug!("Session {} finished gathering candidates", session.id());
                    }
                    Some(PeerEvent::StateChanged(state)) => {
                        if state == ConnectionState::Connected {
                            session.set_state(SessionState::Connected);
                        } else if state.is_terminal() {
                            break EndReason::PeerState(state);
                        }
                    }
                    None => break EndReason::EngineGone,
                }
            }

            outcome = wait_race(&mut pending) => {
                pending = None;
                if outcome == GatherOutcome::TimedOut {
                    debug!("Session {} ICE gathering timed out, answering early", session.id());
                }

                match session.peer().local_description().await {
                    Some(sdp) => {
                        let msg = ServerMessage::Answer { sdp };
                        if !send_message(&mut outbound, session.id(), &msg).await {
                            break EndReason::SendFailed;
                        }
                        info!("Session {} sent answer", session.id());
                    }
                    None => warn!("Session {} has no local description to answer with", session.id()),
                }
            }
        }
    };

    match &reason {
        EndReason::Transport(e) if e.is_expected() => {
            debug!("Session {} connection closed: {}", session.id(), e)
        }
        EndReason::Transport(e) => warn!("Session {} socket error: {}", session.id(), e),
        other => info!("Session {} ending: {:?}", session.id(), other),
    }

    session.set_state(SessionState::Closing);
    session.close_peer().await;
    session.set_state(SessionState::Closed);
    ctx.registry.remove(session.id());

    if let Err(e) = outbound.close().await {
        debug!("Session {} socket close: {}", session.id(), e);
    }

    Ok(())
}

async fn handle_text(
    session: &Session,
    text: &str,
    gather_timeout: Duration,
    pending: &mut Option<AnswerRace>,
) {
    let msg = match parse_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Session {} ignoring message: {}", session.id(), e);
            return;
        }
    };

    match msg {
        ClientMessage::Offer(offer) => match prepare_answer(session, offer, gather_timeout).await {
            Ok(race) => {
                if pending.replace(race).is_some() {
                    debug!("Session {} replaced pending answer", session.id());
                }
            }
            Err(e) => warn!("Session {} dropped offer: {}", session.id(), e),
        },
        ClientMessage::Candidate(candidate) => {
            if let Err(e) = session.peer().add_ice_candidate(candidate).await {
                warn!("Session {} candidate rejected: {}", session.id(), e);
            }
        }
        ClientMessage::Unknown(kind) => {
            debug!("Session {} ignoring message type '{}'", session.id(), kind);
        }
    }
}

/// Apply an offer and return the race that decides when to answer
async fn prepare_answer(
    session: &Session,
    offer: SdpOffer,
    gather_timeout: Duration,
) -> Result<AnswerRace> {
    let peer = session.peer();

    peer.set_remote_description(offer).await?;
    session.set_state(SessionState::Negotiating);

    let answer = peer.create_answer().await?;
    let mut gather_rx = peer.gathering_complete().await;
    peer.set_local_description(answer).await?;

    Ok(Box::pin(async move {
        tokio::select! {
            _ = gather_rx.recv() => GatherOutcome::Complete,
            _ = tokio::time::sleep(gather_timeout) => GatherOutcome::TimedOut,
        }
    }))
}

/// Returns false when the socket is gone
async fn send_message<W>(outbound: &mut W, session_id: &str, msg: &ServerMessage) -> bool
where
    W: Sink<String> + Unpin,
    W::Error: Display,
{
    let json = match msg.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Session {} failed to encode message: {}", session_id, e);
            return true;
        }
    };

    match outbound.send(json).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Session {} send failed: {}", session_id, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::fake::{shared_tracks, FakeEngine, FakePeer, Gathering};
    use crate::webrtc::signaling::IceCandidate;
    use futures::channel::mpsc as fmpsc;
    use serde_json::Value;
    use std::time::Instant;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    type Inbound = std::result::Result<SignalFrame, TransportError>;

    struct Client {
        tx: fmpsc::UnboundedSender<Inbound>,
        rx: fmpsc::UnboundedReceiver<String>,
        task: JoinHandle<Result<()>>,
    }

    impl Client {
        fn send_text(&self, text: &str) {
            self.tx
                .unbounded_send(Ok(SignalFrame::Text(text.to_string())))
                .unwrap();
        }

        async fn recv(&mut self) -> Value {
            let text = timeout(Duration::from_secs(2), self.rx.next())
                .await
                .expect("timed out waiting for message")
                .expect("socket closed");
            serde_json::from_str(&text).unwrap()
        }

        async fn assert_silent(&mut self, wait: Duration) {
            if let Ok(Some(text)) = timeout(wait, self.rx.next()).await {
                panic!("unexpected message: {}", text);
            }
        }
    }

    fn connect(
        engine: &Arc<FakeEngine>,
        registry: &Arc<SessionRegistry>,
        tracks: Vec<SharedTrack>,
        gather_timeout: Duration,
    ) -> Client {
        let (tx, inbound) = fmpsc::unbounded();
        let (outbound, rx) = fmpsc::unbounded();
        let ctx = SessionContext {
            engine: engine.clone(),
            registry: registry.clone(),
            tracks,
            ice_gather_timeout: gather_timeout,
        };
        let task = tokio::spawn(run_session(ctx, inbound, outbound));
        Client { tx, rx, task }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn peer_at(engine: &FakeEngine, index: usize) -> Arc<FakePeer> {
        wait_for(|| engine.peer(index).is_some()).await;
        engine.peer(index).unwrap()
    }

    fn offer(sdp: &str) -> String {
        format!(r#"{{"type":"offer","sdp":{{"type":"offer","sdp":"{}"}}}}"#, sdp)
    }

    #[tokio::test]
    async fn test_answer_sent_once_after_gather_timeout() {
        let engine = FakeEngine::new(Gathering::Never);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_millis(100));
        let peer = peer_at(&engine, 0).await;
        wait_for(|| registry.len() == 1).await;

        let started = Instant::now();
        client.send_text(&offer("v=0"));

        let msg = client.recv().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(msg["type"], "answer");
        assert_eq!(msg["sdp"]["type"], "answer");
        assert_eq!(msg["sdp"]["sdp"], format!("answer-{}-1", peer.id));

        client.assert_silent(Duration::from_millis(250)).await;
        let session = registry.get(&peer.id).unwrap();
        assert_eq!(session.state(), SessionState::Negotiating);
    }

    #[tokio::test]
    async fn test_immediate_gathering_answers_early() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_secs(30));
        peer_at(&engine, 0).await;

        let started = Instant::now();
        client.send_text(&offer("v=0"));
        let msg = client.recv().await;

        assert_eq!(msg["type"], "answer");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_malformed_offer_keeps_session() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        let peer = peer_at(&engine, 0).await;
        wait_for(|| registry.len() == 1).await;

        client.send_text(r#"{"type":"offer","sdp":{}}"#);
        client.send_text(r#"{"type":"offer","sdp":{"sdp":""}}"#);
        client.send_text("not json");
        client.send_text(r#"{"sdp":"missing type"}"#);
        client.assert_silent(Duration::from_millis(100)).await;

        assert_eq!(registry.len(), 1);
        assert!(peer.remote.lock().is_none());
        assert_eq!(
            registry.get(&peer.id).unwrap().state(),
            SessionState::Connecting
        );

        client.send_text(&offer("v=0"));
        assert_eq!(client.recv().await["type"], "answer");
    }

    #[tokio::test]
    async fn test_unknown_type_ignored() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        peer_at(&engine, 0).await;

        client.send_text(r#"{"type":"bye"}"#);
        client.send_text(&offer("v=0"));

        assert_eq!(client.recv().await["type"], "answer");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_candidates_pass_through() {
        let engine = FakeEngine::new(Gathering::Never);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        let peer = peer_at(&engine, 0).await;

        client.send_text(r#"{"type":"candidate","candidate":{"candidate":"bad"}}"#);
        client.send_text(
            r#"{"type":"candidate","candidate":{"candidate":"c0","sdpMid":"0","sdpMLineIndex":0}}"#,
        );
        wait_for(|| peer.candidates.lock().len() == 1).await;
        assert_eq!(
            peer.candidates.lock()[0],
            IceCandidate::new("c0").with_mid("0", 0)
        );

        engine.emit(
            0,
            PeerEvent::LocalCandidate(Some(IceCandidate::new("c1").with_mid("0", 0))),
        );
        let msg = client.recv().await;
        assert_eq!(msg["type"], "candidate");
        assert_eq!(msg["candidate"]["candidate"], "c1");
        assert_eq!(msg["candidate"]["sdpMid"], "0");
        assert_eq!(msg["candidate"]["sdpMLineIndex"], 0);

        engine.emit(0, PeerEvent::LocalCandidate(None));
        client.assert_silent(Duration::from_millis(100)).await;
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_second_offer_replaces_pending_answer() {
        let engine = FakeEngine::new(Gathering::Never);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_millis(200));
        let peer = peer_at(&engine, 0).await;

        client.send_text(&offer("v=1"));
        sleep(Duration::from_millis(50)).await;
        client.send_text(&offer("v=2"));

        let msg = client.recv().await;
        assert_eq!(msg["sdp"]["sdp"], format!("answer-{}-2", peer.id));
        client.assert_silent(Duration::from_millis(400)).await;
    }

    #[tokio::test]
    async fn test_connected_state_tracked() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());
        let _client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        let peer = peer_at(&engine, 0).await;
        wait_for(|| registry.len() == 1).await;

        engine.emit(0, PeerEvent::StateChanged(ConnectionState::Connected));
        let session = registry.get(&peer.id).unwrap();
        wait_for(|| session.state() == SessionState::Connected).await;
    }

    #[tokio::test]
    async fn test_terminal_state_tears_down_once() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());
        let mut client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        let peer = peer_at(&engine, 0).await;
        wait_for(|| registry.len() == 1).await;
        let session = registry.get(&peer.id).unwrap();

        engine.emit(0, PeerEvent::StateChanged(ConnectionState::Failed));
        engine.emit(0, PeerEvent::StateChanged(ConnectionState::Closed));

        client.task.await.unwrap().unwrap();
        assert_eq!(peer.close_count(), 1);
        assert!(registry.is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(client.rx.next().await.is_none());

        // A late close from shutdown is a no-op
        assert!(!session.close_peer().await);
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_end_tears_down() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());

        let client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        let first = peer_at(&engine, 0).await;
        drop(client.tx);
        client.task.await.unwrap().unwrap();
        assert_eq!(first.close_count(), 1);

        let client = connect(&engine, &registry, Vec::new(), Duration::from_secs(5));
        let second = peer_at(&engine, 1).await;
        client
            .tx
            .unbounded_send(Err(TransportError::from_message("Connection reset by peer")))
            .unwrap();
        client.task.await.unwrap().unwrap();
        assert_eq!(second.close_count(), 1);

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_share_tracks_independently() {
        let engine = FakeEngine::new(Gathering::Immediate);
        let registry = Arc::new(SessionRegistry::new());
        let tracks = shared_tracks();

        let a = connect(&engine, &registry, tracks.clone(), Duration::from_secs(5));
        let peer_a = peer_at(&engine, 0).await;
        let mut b = connect(&engine, &registry, tracks.clone(), Duration::from_secs(5));
        let peer_b = peer_at(&engine, 1).await;
        wait_for(|| registry.len() == 2).await;

        assert_eq!(peer_a.tracks.lock().len(), 2);
        assert_eq!(peer_b.tracks.lock().len(), 2);

        a.tx.unbounded_send(Ok(SignalFrame::Close)).unwrap();
        a.task.await.unwrap().unwrap();

        assert_eq!(peer_a.close_count(), 1);
        assert_eq!(peer_b.close_count(), 0);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&peer_b.id).is_some());
        assert!(tracks.iter().all(|t| !t.is_closed()));

        b.send_text(&offer("v=0"));
        assert_eq!(b.recv().await["type"], "answer");
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::from_message("Connection reset by peer").is_expected());
        assert!(TransportError::from_message("Connection closed normally").is_expected());
        assert!(TransportError::from_message("unexpected EOF").is_expected());
        assert!(!TransportError::from_message("invalid UTF-8 in frame").is_expected());
        assert!(!TransportError::new("x", false).is_expected());
    }
}
