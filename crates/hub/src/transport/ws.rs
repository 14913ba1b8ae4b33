// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent channel WebSocket handler.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Extension;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use crate::auth::Identity;
use crate::hub::protocol::ServerMessage;
use crate::hub::STALE_REASON;
use crate::state::AppState;

/// `GET /ws`: upgrade an authenticated agent channel.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, identity, socket))
}

type WsTx = SplitSink<WebSocket, Message>;

/// Per-connection loop: pump hub output to the socket and socket frames into
/// the hub until either side goes away.
async fn handle_connection(state: Arc<AppState>, identity: Identity, socket: WebSocket) {
    let mut handle = state.hub.connect(identity).await;
    let id = handle.id;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                close(&mut ws_tx, close_code::AWAY, "shutdown").await;
                break;
            }

            _ = handle.evicted.cancelled() => {
                close(&mut ws_tx, close_code::POLICY, STALE_REASON).await;
                break;
            }

            msg = handle.rx.recv() => {
                let Some(msg) = msg else { break };
                if send_json(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.hub.handle_text(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(channel = id, err = %e, "channel read failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect(id).await;
}

/// Serialize and send a server message as a text frame.
async fn send_json(tx: &mut WsTx, msg: &ServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(err = %e, "failed to encode server message");
            return Ok(());
        }
    };
    tx.send(Message::Text(text.into())).await
}

async fn close(tx: &mut WsTx, code: u16, reason: &'static str) {
    let frame = CloseFrame { code, reason: reason.into() };
    let _ = tx.send(Message::Close(Some(frame))).await;
}
