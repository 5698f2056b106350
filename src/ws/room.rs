//! Game-room WebSocket endpoint

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::origin_allowed;
use crate::ws::protocol::{Envelope, ErrorCode, ServerEvent};
use crate::ws::{close_with_event, resolve_user, spawn_writer, AuthQuery};

/// Outbox depth for a room socket; sized for a full game of events
const OUTBOX_CAPACITY: usize = 64;

/// `GET /ws/room/:room_id` upgrade handler
pub async fn room_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<Uuid>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !origin_allowed(&headers, &state.config.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, query, state))
}

async fn handle_socket(socket: WebSocket, room_id: Uuid, query: AuthQuery, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (outbox, outbox_rx) = mpsc::channel::<ServerEvent>(OUTBOX_CAPACITY);
    let writer = spawn_writer(sink, outbox_rx);

    let user = match resolve_user(&state, &query.github_login, query.github_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::JoinFailed, "unknown player; github_id required on first contact"),
            )
            .await;
            return;
        }
        Err(e) => {
            warn!(room_id = %room_id, login = %query.github_login, error = %e, "user lookup failed");
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::JoinFailed, "failed to resolve player"),
            )
            .await;
            return;
        }
    };

    // only rooms the matchmaking service actually created are joinable
    if let Err(e) = state.rooms.get_by_id(room_id).await {
        info!(room_id = %room_id, user_id = %user.id, error = %e, "unknown room");
        close_with_event(
            outbox,
            writer,
            ServerEvent::error(ErrorCode::JoinFailed, "no such room"),
        )
        .await;
        return;
    }

    let (seat, _done, room) = match state.room_manager.join(room_id, outbox.clone(), user.clone()) {
        Ok(joined) => joined,
        Err(e) => {
            info!(room_id = %room_id, user_id = %user.id, error = %e, "room join rejected");
            close_with_event(
                outbox,
                writer,
                ServerEvent::error(ErrorCode::RoomFull, "room already has two players"),
            )
            .await;
            return;
        }
    };

    // The first arrival owns the game loop.
    if seat == 0 {
        tokio::spawn(room.clone().run(state.shutdown.child_token()));
    }

    info!(room_id = %room_id, seat, user_id = %user.id, "player connected to room");

    // Reader loop: decode envelopes and feed the room's state machine.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => room.push_message(seat, envelope.msg_type, envelope.payload),
                Err(e) => {
                    warn!(room_id = %room_id, seat, error = %e, "invalid frame on room channel");
                }
            },
            Ok(Message::Close(_)) => {
                info!(room_id = %room_id, seat, "client closed the room channel");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(room_id = %room_id, seat, error = %e, "room socket error");
                break;
            }
        }
    }

    room.notify_disconnect(seat);
    // the seat inside the room still holds an outbox clone until the room
    // is torn down, so stop the writer rather than waiting for it
    writer.abort();
    info!(room_id = %room_id, seat, "room connection closed");
}
