//! WebSocket transport for voice sessions
//!
//! The gateway is the only code that touches frames. Binary frames are raw
//! audio; text frames are JSON [`ClientMessage`]s. Everything the client
//! receives is a [`ServerMessage`] funneled through one outbound channel.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;
use crate::Result;
use crate::session::protocol::{self, ClientMessage, ServerMessage};
use crate::session::{Connection, CoordinatorHandle, TurnCoordinator};

const WELCOME: &str = "Connected, voice assistant ready";

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending messages back to client
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);

    let established = ServerMessage::ConnectionEstablished {
        connection_id: connection_id.clone(),
        message: WELCOME.to_string(),
    };
    if tx.send(established).await.is_err() {
        return;
    }

    let handle = TurnCoordinator::spawn(
        connection_id.clone(),
        state.settings,
        state.collaborators.clone(),
        state.pool.clone(),
        tx.clone(),
    );
    state
        .registry
        .register(Connection::new(handle.clone(), tx.clone()))
        .await;

    tracing::info!(connection_id = %connection_id, "WebSocket connected");

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match protocol::encode(&msg) {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, kind = msg.kind(), "failed to encode message"),
            }
        }
    });

    // Handle incoming messages
    let recv_id = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let outcome = match msg {
                Message::Binary(data) => handle.push_audio(data.to_vec()).await,
                Message::Text(text) => handle_message(&text, &handle, &tx).await,
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received ping");
                    Ok(())
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %recv_id, "WebSocket closed by client");
                    break;
                }
                Message::Pong(_) => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::debug!(connection_id = %recv_id, error = %e, "stopping receive loop");
                break;
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.unregister(&connection_id).await;
    tracing::info!(connection_id = %connection_id, "WebSocket disconnected");
}

/// Handle a single text frame
///
/// Malformed input is answered with an `error` message and otherwise ignored.
/// Only a stopped coordinator or a closed outbound channel is an error.
pub async fn handle_message(
    text: &str,
    handle: &CoordinatorHandle,
    tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    let incoming = match ClientMessage::parse(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::warn!(connection_id = %handle.connection_id(), error = %e, "dropping malformed message");
            return reply(tx, ServerMessage::error(e.to_string())).await;
        }
    };

    match incoming {
        ClientMessage::AudioData { audio } => match protocol::decode_audio(&audio) {
            Ok(chunk) => handle.push_audio(chunk).await,
            Err(e) => {
                tracing::warn!(connection_id = %handle.connection_id(), error = %e, "dropping audio payload");
                reply(tx, ServerMessage::error(e.to_string())).await
            }
        },
        ClientMessage::Text { text } => handle.submit_text(text).await,
        ClientMessage::Interrupt => handle.interrupt().await,
        ClientMessage::Reset => handle.reset().await,
        ClientMessage::Ping => reply(tx, ServerMessage::Pong).await,
        ClientMessage::StartRecording => {
            tracing::info!(connection_id = %handle.connection_id(), "client started recording");
            Ok(())
        }
        ClientMessage::StopRecording => {
            tracing::info!(connection_id = %handle.connection_id(), "client stopped recording");
            Ok(())
        }
    }
}

async fn reply(tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> Result<()> {
    tx.send(message)
        .await
        .map_err(|_| crate::Error::ConnectionLost("outbound channel closed".to_string()))
}
