//! Background port streaming over WebSocket.
//!
//! # Responsibilities
//! - Claim a `ws:` port on `GET /.background/{port_id}`
//! - Forward each follow-up message as a JSON text frame
//! - Feed text frames from the caller back as interaction replies
//!
//! # Data Flow
//! ```text
//! wait_until work → BackgroundPort ──→ socket ──→ caller
//! confirm/prompt  ← reply channel  ←── socket ←── caller
//! ```
//!
//! # Design Decisions
//! - A port can be claimed once; a second connection gets 404
//! - The socket closes when the port closes (all work settled)
//! - Ping/pong handled transparently by axum

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;

use crate::http::server::AppState;
use crate::messaging::BackgroundReceiver;

pub async fn background_handler(
    State(state): State<AppState>,
    Path(port_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.runtime.ports().claim(&port_id) {
        Some(receiver) => {
            tracing::debug!(port_id = %port_id, "Background socket attached");
            ws.on_upgrade(move |socket| stream_port(socket, receiver))
        }
        None => {
            tracing::debug!(port_id = %port_id, "Unknown or already claimed port");
            (StatusCode::NOT_FOUND, "Unknown background port").into_response()
        }
    }
}

async fn stream_port(socket: WebSocket, receiver: BackgroundReceiver) {
    let port_id = receiver.id().to_string();
    let (mut inbound, replies) = receiver.into_parts();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(port_id = %port_id, error = %e, "Failed to encode follow-up");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        tracing::debug!(port_id = %port_id, "Caller went away");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(reply) => {
                        replies.send(reply).ok();
                    }
                    Err(e) => tracing::warn!(port_id = %port_id, error = %e, "Ignoring malformed reply"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(port_id = %port_id, error = %e, "Background socket error");
                    break;
                }
            }
        }
    }
    tracing::debug!(port_id = %port_id, "Background socket closed");
}
