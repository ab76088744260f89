//! WebSocket upgrade + message loop. A socket is bound to one account and one
//! lesson: it receives the current snapshot, then every `SyncEvent`, and can
//! send completion taps, retry, reset and ping.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, error, instrument, debug, warn};
use uuid::Uuid;

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::{AppState, LessonSession};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
  pub account: String,
  pub lesson: String,
}

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  Query(q): Query<WsQuery>,
) -> Response {
  info!(target: "kapamtalk_backend", "WebSocket upgrade requested");
  match state.open_lesson(&q.account, &q.lesson).await {
    Ok(session) => ws.on_upgrade(move |socket| handle_ws(socket, session)),
    Err(e) => e.into_response(),
  }
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "kapamtalk_backend", error = %e, "WS send error");
    return false;
  }
  true
}

#[instrument(level = "info", skip(socket, session), fields(conn = %Uuid::new_v4(), lesson = %session.schema().id))]
async fn handle_ws(mut socket: WebSocket, session: Arc<LessonSession>) {
  info!(target: "kapamtalk_backend", "WebSocket connected");
  let mut events = session.subscribe();
  if !send(&mut socket, &ServerWsMessage::Snapshot { snapshot: session.snapshot() }).await {
    return;
  }

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => {
            let reply = reply_to_text(&txt, &session).await;
            if !send(&mut socket, &reply).await {
              break;
            }
          }
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
      event = events.recv() => {
        match event {
          Ok(event) => {
            if !send(&mut socket, &ServerWsMessage::Event { event }).await {
              break;
            }
          }
          Err(RecvError::Lagged(skipped)) => {
            // Missed events are covered by a fresh snapshot.
            warn!(target: "kapamtalk_backend", skipped, "WS client lagging; resending snapshot");
            if !send(&mut socket, &ServerWsMessage::Snapshot { snapshot: session.snapshot() }).await {
              break;
            }
          }
          Err(RecvError::Closed) => break,
        }
      }
    }
  }
  info!(target: "kapamtalk_backend", "WebSocket disconnected");
}

async fn reply_to_text(txt: &str, session: &LessonSession) -> ServerWsMessage {
  match serde_json::from_str::<ClientWsMessage>(txt) {
    Ok(incoming) => {
      debug!(target: "kapamtalk_backend", "WS received: {:?}", &incoming);
      handle_client_ws(incoming, session).await
    }
    Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
  }
}

#[instrument(level = "info", skip(session))]
async fn handle_client_ws(msg: ClientWsMessage, session: &LessonSession) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::MarkComplete { identity } => {
      let outcome = session.mark_complete(&identity);
      tracing::info!(target: "lesson", %identity, ?outcome, "WS mark_complete");
      ServerWsMessage::Marked { identity, outcome }
    }

    ClientWsMessage::Retry => match session.retry().await {
      Ok(_) => ServerWsMessage::Snapshot { snapshot: session.snapshot() },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },

    ClientWsMessage::Reset => match session.reset().await {
      Ok(()) => ServerWsMessage::Snapshot { snapshot: session.snapshot() },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },

    ClientWsMessage::Snapshot => ServerWsMessage::Snapshot { snapshot: session.snapshot() },
  }
}
