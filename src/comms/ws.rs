//! Realtime chat protocol over WebSocket.
//!
//! Client frames: `{"event": "generate", "data": {conversationId, message, userId}}`.
//! Server frames: `chunk`, `complete` and `error` events (see
//! [`ChatEvent`]). Each connection owns one [`ChatSession`]; when the socket
//! closes the session is dropped, which cancels every generation it started.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tutor::Tutor;
use crate::tutor::chat::{ChatEvent, ChatRequest};

use super::AxumState;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum ClientEvent {
    Generate(GeneratePayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratePayload {
    conversation_id: String,
    message: String,
    user_id: String,
}

/// Connection-scoped chat state. Dropping it cancels in-flight generation.
pub struct ChatSession {
    tutor: Arc<Tutor>,
    cancel: CancellationToken,
    events: mpsc::Sender<ChatEvent>,
}

impl ChatSession {
    /// `parent` is the service shutdown token; the session gets a child of it.
    pub fn new(tutor: Arc<Tutor>, parent: &CancellationToken) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        (Self { tutor, cancel: parent.child_token(), events }, rx)
    }

    /// Handle one client text frame. Work runs on its own task; every
    /// resulting event arrives on the session's receiver.
    pub fn dispatch(&self, frame: &str) {
        let events = self.events.clone();
        match serde_json::from_str::<ClientEvent>(frame) {
            Ok(ClientEvent::Generate(payload)) => {
                let tutor = Arc::clone(&self.tutor);
                let cancel = self.cancel.clone();
                let req = ChatRequest::user(payload.conversation_id, payload.user_id, payload.message);
                tokio::spawn(async move {
                    // The outcome has already been reported as an event.
                    let _ = tutor.generate(req, &events, &cancel).await;
                });
            }
            Err(e) => {
                debug!(error = %e, "rejected client frame");
                tokio::spawn(async move {
                    let _ = events.send(ChatEvent::Error { error: format!("invalid frame: {e}") }).await;
                });
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// GET /ws
pub(super) async fn upgrade(State(state): State<AxumState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: AxumState) {
    let (session, mut events) = ChatSession::new(Arc::clone(&state.tutor), &state.shutdown);
    info!(channel_id = %state.channel_id, "websocket session opened");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => session.dispatch(text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(channel_id = %state.channel_id, error = %e, "websocket receive failed");
                    break;
                }
            },
            Some(event) = events.recv() => {
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "cannot serialise chat event");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    drop(session);
    info!(channel_id = %state.channel_id, "websocket session closed");
}
