//! Durable-store contracts consumed by the core
//!
//! The gameplay layer only sees these narrow traits; the concrete
//! implementations live in `users`/`rooms` (PostgreSQL) and
//! `matchmaking::store` (Redis).

pub mod db;
pub mod rooms;
pub mod users;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use uuid::Uuid;

pub use rooms::{Room, RoomStatus};
pub use users::{NewUser, User};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("matchmaking store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("row not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// User records (get/create on first contact, balance persistence)
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<User, StoreError>;
    async fn get_by_github_login(&self, login: &str) -> Result<Option<User>, StoreError>;
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
    async fn update_gnu_balance(&self, id: Uuid, balance: i64) -> Result<(), StoreError>;
}

/// Room records (written once as `waiting`, read by external observers)
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create(&self, room: &Room) -> Result<(), StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Room, StoreError>;
}

/// Shared FIFO pairing queue plus the per-user active flag
#[async_trait]
pub trait MatchmakeStore: Send + Sync {
    /// Append to the tail of the queue
    async fn enqueue(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Atomically remove the two head entries; `None` when fewer than two
    /// are queued (a lone entry must stay queued)
    async fn dequeue(&self) -> Result<Option<(Uuid, Uuid)>, StoreError>;

    /// Delete the first occurrence of `user_id`; no error if absent
    async fn remove(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Set the TTL-bounded active flag only if absent; true iff created
    async fn set_active(&self, user_id: Uuid) -> Result<bool, StoreError>;

    /// Delete the active flag; no error if absent
    async fn clear_active(&self, user_id: Uuid) -> Result<(), StoreError>;
}
