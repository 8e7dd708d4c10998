//! WebSocket gateway.
//!
//! Each upgraded socket is registered with the
//! [`ConnectionRegistry`](crate::broadcast::ConnectionRegistry) and served by
//! two tasks: a writer that drains the connection's outbound queue and sends
//! heartbeat pings, and the reader loop that answers control messages and
//! closes idle connections.

pub mod protocol;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use crate::AppState;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let settings = state.config_manager.config().broadcast.clone();
    let heartbeat = Duration::from_secs(settings.heartbeat_secs);
    let idle_timeout = Duration::from_secs(settings.idle_timeout_secs);

    let (conn, mut rx) = state.registry.add();
    let conn_id = conn.id();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    // Writer: outbound queue and heartbeat pings.
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if sink.send(Message::Text(text.as_ref().into())).await.is_err() {
                        tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    // Reader: control messages; any inbound frame counts as activity.
    loop {
        let next = tokio::select! {
            _ = conn.closed() => {
                tracing::debug!(conn_id = %conn_id, "connection dropped by registry");
                break;
            }
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::info!(conn_id = %conn_id, "closing idle WebSocket");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let Some(reply) = protocol::handle_text(&state, &conn, text.as_str()).await else {
                    continue;
                };
                if let Err(e) = conn.reply(reply) {
                    tracing::debug!(conn_id = %conn_id, error = %e, "reply not queued");
                }
            }
            Message::Binary(_) => {
                let reply = r#"{"type":"error","error":"binary frames are not supported"}"#;
                if let Err(e) = conn.reply(reply) {
                    tracing::debug!(conn_id = %conn_id, error = %e, "reply not queued");
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                tracing::trace!(conn_id = %conn_id, "heartbeat");
            }
        }
    }

    // Dropping the guard unregisters the connection; the writer flushes what
    // is left. Pending foreground replies still hold the queue open, hence
    // the timeout.
    drop(conn);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
