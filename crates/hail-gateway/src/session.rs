// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket push-channel sessions.
//!
//! Each client opens `/ws/:subject_id?token=...`; the token's role decides
//! whether the subject is read as a driver id or a ride id. The handshake is
//! refused before upgrade when the principal does not own the subject.
//! After upgrade the session pumps registry envelopes to the socket and
//! treats any inbound traffic as keepalive activity.

use crate::handlers::ApiError;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use hail::{DispatchError, RideEvent, SubjectId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(subject_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.can_accept_client() {
        warn!("Connection rejected: max connections reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let Some(token) = query.token else {
        return ApiError::from(DispatchError::Unauthorized).into_response();
    };

    match state.engine.open_channel(&subject_id, &token) {
        Ok(conn) => ws
            .on_upgrade(move |socket| handle_socket(socket, conn, state))
            .into_response(),
        Err(e) => {
            warn!("Handshake refused for subject {}: {}", subject_id, e);
            ApiError::from(e).into_response()
        }
    }
}

/// Run one push-channel session until disconnect.
async fn handle_socket(socket: WebSocket, conn: hail::Connection, state: Arc<AppState>) {
    let hail::Connection {
        subject,
        id,
        mut rx,
    } = conn;
    info!("[{}#{}] Channel connected", subject, id);

    // First envelope on every channel; also seq 1 for gap detection
    state.registry.send(&subject, RideEvent::welcome());

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Forward registry envelopes to the socket. The channel closing (idle
    // sweep or newest-wins replacement) ends the task and closes the socket.
    let forward_subject = subject.clone();
    let ws_forward = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        debug!("[{}#{}] WebSocket send failed, closing", forward_subject, id);
                        break;
                    }
                }
                Err(e) => {
                    error!("[{}#{}] Failed to serialize envelope: {}", forward_subject, id, e);
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Inbound traffic is keepalive only; the push protocol is one-way.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!("[{}#{}] Client text ignored: {}", subject, id, text);
                state.registry.touch(&subject);
            }
            Ok(Message::Ping(_)) => {
                // Axum answers the pong automatically
                state.registry.touch(&subject);
            }
            Ok(Message::Pong(_)) => {
                state.registry.touch(&subject);
            }
            Ok(Message::Binary(_)) => {
                warn!("[{}#{}] Binary messages not supported", subject, id);
            }
            Ok(Message::Close(_)) => {
                info!("[{}#{}] Client closed connection", subject, id);
                break;
            }
            Err(e) => {
                debug!("[{}#{}] WebSocket error: {}", subject, id, e);
                break;
            }
        }
    }

    // Cleanup; guarded so a replacement connection is never torn down
    ws_forward.abort();
    close_channel(&state, &subject, id);
    info!("[{}#{}] Session ended", subject, id);
}

fn close_channel(state: &AppState, subject: &SubjectId, id: u64) {
    if !state.registry.close_if_current(subject, id) {
        debug!("[{}#{}] Channel already replaced or closed", subject, id);
    }
}
