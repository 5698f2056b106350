//! Matchmaking WebSocket endpoint

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::http::middleware::origin_allowed;
use crate::matchmaking::MatchError;
use crate::ws::protocol::{action, Envelope, ErrorCode, ServerEvent};
use crate::ws::{close_with_event, resolve_user, spawn_writer, AuthQuery};

/// Outbox depth for a matchmaking socket; traffic is a handful of events
const OUTBOX_CAPACITY: usize = 16;

/// `GET /ws/matchmake` upgrade handler
pub async fn matchmake_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !origin_allowed(&headers, &state.config.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

async fn handle_socket(socket: WebSocket, query: AuthQuery, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (outbox, outbox_rx) = mpsc::channel::<ServerEvent>(OUTBOX_CAPACITY);
    let writer = spawn_writer(sink, outbox_rx);

    let user = match resolve_user(&state, &query.github_login, query.github_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(login = %query.github_login, "unknown player without github_id");
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::JoinFailed, "unknown player; github_id required on first contact"),
            )
            .await;
            return;
        }
        Err(e) => {
            warn!(login = %query.github_login, error = %e, "user lookup failed");
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::QueueError, "failed to resolve player"),
            )
            .await;
            return;
        }
    };

    info!(user_id = %user.id, login = %user.github_login, "matchmaking connection opened");
    state.hub.register(user.id, outbox.clone());

    match state.matchmaking.join_queue(user.id).await {
        Ok(()) => {
            let _ = outbox.send(ServerEvent::EvQueueJoined { user_id: user.id }).await;
        }
        Err(MatchError::AlreadyInQueue) => {
            // unregister first: the writer only finishes once the hub's
            // clone of the outbox is gone
            state.hub.unregister(user.id).await;
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::AlreadyInQueue, "already waiting for a match"),
            )
            .await;
            return;
        }
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "failed to join queue");
            state.hub.unregister(user.id).await;
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::QueueError, "failed to join the queue"),
            )
            .await;
            return;
        }
    }

    // Reader loop; the hub driver delivers ev_match_found through the
    // registered outbox while this task watches for a cancel or a close.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) if envelope.msg_type == action::CANCEL_MATCHMAKING => {
                    info!(user_id = %user.id, "matchmaking cancelled by player");
                    break;
                }
                Ok(envelope) => {
                    debug!(user_id = %user.id, msg_type = %envelope.msg_type, "ignoring unexpected message");
                }
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "invalid frame on matchmaking channel");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(user_id = %user.id, error = %e, "matchmaking socket error");
                break;
            }
        }
    }

    state.hub.unregister(user.id).await;
    drop(outbox);
    let _ = writer.await;
    info!(user_id = %user.id, "matchmaking connection closed");
}
