//! WebSocket endpoints and wire protocol

pub mod matchmake;
pub mod protocol;
pub mod room;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::store::{NewUser, StoreError, User};
use crate::ws::protocol::ServerEvent;

/// Query-parameter authentication shared by both upgrade routes
#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub github_login: String,
    /// Required only on a player's very first contact
    pub github_id: Option<i64>,
}

/// Spawn the single writer for one socket: it drains the outbox into the
/// sink, so no other task ever writes this channel
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                debug!("socket write failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    })
}

/// Deliver one final event, then let the writer flush and close
pub(crate) async fn close_with_event(
    outbox: mpsc::Sender<ServerEvent>,
    writer: JoinHandle<()>,
    event: ServerEvent,
) {
    let _ = outbox.send(event).await;
    drop(outbox);
    let _ = writer.await;
}

/// Look up the player named in the query, creating the record on first
/// contact when the external id is supplied
pub(crate) async fn resolve_user(
    state: &AppState,
    login: &str,
    github_id: Option<i64>,
) -> Result<Option<User>, StoreError> {
    if let Some(user) = state.users.get_by_github_login(login).await? {
        return Ok(Some(user));
    }
    let Some(github_id) = github_id else {
        return Ok(None);
    };
    let user = state
        .users
        .create(NewUser { github_id, github_login: login.to_string() })
        .await?;
    info!(user_id = %user.id, login = %user.github_login, "registered user on first contact");
    Ok(Some(user))
}
