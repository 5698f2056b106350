//! Registry of live game rooms

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

use crate::store::{User, UserStore};
use crate::ws::protocol::ServerEvent;

use super::room::{GameRoom, RoomFull};

/// Room-id keyed registry; rooms remove themselves on teardown
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<GameRoom>>>>,
    users: Arc<dyn UserStore>,
}

impl RoomManager {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), users }
    }

    fn get_or_create(&self, room_id: Uuid) -> Arc<GameRoom> {
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get(&room_id) {
            return room.clone();
        }

        let registry = self.rooms.clone();
        let room = Arc::new(GameRoom::new(
            room_id,
            self.users.clone(),
            Box::new(move || {
                registry.write().remove(&room_id);
            }),
        ));
        rooms.insert(room_id, room.clone());
        info!(room_id = %room_id, "created room");
        room
    }

    /// Seat a player. The seat-0 caller owns the game loop: it must spawn
    /// `room.run`, which keeps the first arrival in charge without a
    /// separate coordinator.
    pub fn join(
        &self,
        room_id: Uuid,
        outbox: mpsc::Sender<ServerEvent>,
        user: User,
    ) -> Result<(usize, watch::Receiver<bool>, Arc<GameRoom>), RoomFull> {
        let room = self.get_or_create(room_id);
        let (seat, done) = room.join(outbox, user)?;
        info!(room_id = %room_id, seat, "player joined room");
        Ok((seat, done, room))
    }

    pub fn live_count(&self) -> usize {
        self.rooms.read().len()
    }
}
