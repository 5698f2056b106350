//! Pairing service - queue membership and match creation

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::{MatchmakeStore, Room, RoomStore, StoreError, User, UserStore};

/// A successfully paired match
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub room: Room,
    pub player1: User,
    pub player2: User,
}

/// Matchmaking errors
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("already in queue")]
    AlreadyInQueue,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Matchmaking service over the shared queue and the durable stores
pub struct MatchmakingService {
    queue: Arc<dyn MatchmakeStore>,
    users: Arc<dyn UserStore>,
    rooms: Arc<dyn RoomStore>,
}

impl MatchmakingService {
    pub fn new(
        queue: Arc<dyn MatchmakeStore>,
        users: Arc<dyn UserStore>,
        rooms: Arc<dyn RoomStore>,
    ) -> Self {
        Self { queue, users, rooms }
    }

    /// Join the pairing queue. The active flag is the authoritative
    /// "may I enqueue?" check; holding it without a queue entry is
    /// recovered by compensation below (and by its TTL on crash).
    pub async fn join_queue(&self, user_id: Uuid) -> Result<(), MatchError> {
        if !self.queue.set_active(user_id).await? {
            return Err(MatchError::AlreadyInQueue);
        }

        if let Err(e) = self.queue.enqueue(user_id).await {
            if let Err(clear_err) = self.queue.clear_active(user_id).await {
                warn!(user_id = %user_id, error = %clear_err, "failed to clear active flag after enqueue failure");
            }
            return Err(e.into());
        }

        info!(user_id = %user_id, "player joined matchmaking queue");
        Ok(())
    }

    /// Leave the queue; safe to call when the player is not queued
    pub async fn leave_queue(&self, user_id: Uuid) -> Result<(), MatchError> {
        self.queue.remove(user_id).await?;
        self.queue.clear_active(user_id).await?;
        Ok(())
    }

    /// One pairing attempt. Any failure after a successful dequeue pushes
    /// both players back onto the tail (not the head, so a persistently
    /// failing pair cannot starve the queue) and clears their flags.
    pub async fn try_match(&self) -> Result<Option<MatchResult>, MatchError> {
        let Some((p1_id, p2_id)) = self.queue.dequeue().await? else {
            return Ok(None);
        };

        let player1 = match self.users.get_by_id(p1_id).await {
            Ok(user) => user,
            Err(e) => {
                self.recover_pair(p1_id, p2_id).await;
                return Err(e.into());
            }
        };
        let player2 = match self.users.get_by_id(p2_id).await {
            Ok(user) => user,
            Err(e) => {
                self.recover_pair(p1_id, p2_id).await;
                return Err(e.into());
            }
        };

        let room = Room::new_waiting(p1_id, p2_id);
        if let Err(e) = self.rooms.create(&room).await {
            self.recover_pair(p1_id, p2_id).await;
            return Err(e.into());
        }

        for id in [p1_id, p2_id] {
            if let Err(e) = self.queue.clear_active(id).await {
                warn!(user_id = %id, error = %e, "failed to clear active flag after pairing");
            }
        }

        info!(
            room_id = %room.id,
            player1 = %player1.github_login,
            player2 = %player2.github_login,
            "match created"
        );

        Ok(Some(MatchResult { room, player1, player2 }))
    }

    /// Requeue a dequeued pair after a downstream failure
    async fn recover_pair(&self, p1_id: Uuid, p2_id: Uuid) {
        for id in [p1_id, p2_id] {
            if let Err(e) = self.queue.enqueue(id).await {
                error!(user_id = %id, error = %e, "failed to requeue player after match failure");
            }
            if let Err(e) = self.queue.clear_active(id).await {
                warn!(user_id = %id, error = %e, "failed to clear active flag after match failure");
            }
        }
    }
}
