//! Room records backed by PostgreSQL

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RoomStore, StoreError};

/// Lifecycle of a room record as seen by external observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    InProgress,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::InProgress => "in_progress",
            RoomStatus::Finished => "finished",
        }
    }

    fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "waiting" => Ok(RoomStatus::Waiting),
            "in_progress" => Ok(RoomStatus::InProgress),
            "finished" => Ok(RoomStatus::Finished),
            other => Err(StoreError::Other(format!("unknown room status: {other}"))),
        }
    }
}

/// A matched pair's room record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub status: RoomStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Room {
    /// A fresh `waiting` room for a dequeued pair
    pub fn new_waiting(player1_id: Uuid, player2_id: Uuid) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            player1_id,
            player2_id,
            status: RoomStatus::Waiting,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: Uuid,
    player1_id: Uuid,
    player2_id: Uuid,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<RoomRow> for Room {
    type Error = StoreError;

    fn try_from(row: RoomRow) -> Result<Self, StoreError> {
        Ok(Room {
            id: row.id,
            player1_id: row.player1_id,
            player2_id: row.player2_id,
            status: RoomStatus::parse(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Room store over a Postgres pool
#[derive(Clone)]
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn create(&self, room: &Room) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rooms (id, player1_id, player2_id, status) VALUES ($1, $2, $3, $4)",
        )
        .bind(room.id)
        .bind(room.player1_id)
        .bind(room.player2_id)
        .bind(room.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Room, StoreError> {
        let row = sqlx::query_as::<_, RoomRow>(
            "SELECT id, player1_id, player2_id, status, created_at, updated_at \
             FROM rooms WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other),
        })?;
        row.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_names() {
        for (status, name) in [
            (RoomStatus::Waiting, "waiting"),
            (RoomStatus::InProgress, "in_progress"),
            (RoomStatus::Finished, "finished"),
        ] {
            assert_eq!(status.as_str(), name);
            assert_eq!(RoomStatus::parse(name).unwrap(), status);
        }
        assert!(RoomStatus::parse("open").is_err());
    }
}
