//! WebSocket signaling endpoint
//!
//! Bridges an axum [`WebSocket`] onto the frame stream and string sink that
//! [`run_session`] works with.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::webrtc::{run_session, SignalFrame, TransportError};

/// WebSocket upgrade handler for `/ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Signaling client connected");

    let (sender, receiver) = socket.split();
    let ctx = state.session_context();

    if let Err(e) = run_session(ctx, frames(receiver), text_sink(sender)).await {
        warn!("Signaling session failed to start: {}", e);
    }

    info!("Signaling client disconnected");
}

/// Text and close frames only; ping/pong and binary are dropped here
fn frames<S>(receiver: S) -> impl Stream<Item = Result<SignalFrame, TransportError>> + Unpin + Send
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    receiver.filter_map(|msg| {
        future::ready(match msg {
            Ok(msg) => to_frame(msg).map(Ok),
            Err(e) => Some(Err(TransportError::from_message(e.to_string()))),
        })
    })
}

fn to_frame(msg: Message) -> Option<SignalFrame> {
    match msg {
        Message::Text(text) => Some(SignalFrame::Text(text)),
        Message::Close(_) => Some(SignalFrame::Close),
        Message::Binary(data) => {
            debug!("Ignoring {} byte binary frame", data.len());
            None
        }
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

fn text_sink<S>(sender: S) -> impl Sink<String, Error = axum::Error> + Unpin + Send
where
    S: Sink<Message, Error = axum::Error> + Unpin + Send,
{
    sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_frame() {
        assert_eq!(
            to_frame(Message::Text("hi".to_string())),
            Some(SignalFrame::Text("hi".to_string()))
        );
        assert_eq!(to_frame(Message::Close(None)), Some(SignalFrame::Close));
        assert_eq!(to_frame(Message::Binary(vec![1, 2])), None);
        assert_eq!(to_frame(Message::Ping(vec![])), None);
    }

    #[tokio::test]
    async fn test_frames_skip_control_messages() {
        let input = futures::stream::iter(vec![
            Ok(Message::Ping(vec![])),
            Ok(Message::Text("a".to_string())),
            Ok(Message::Close(None)),
        ]);

        let out: Vec<_> = frames(input).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), &SignalFrame::Text("a".to_string()));
        assert_eq!(out[1].as_ref().unwrap(), &SignalFrame::Close);
    }
}
