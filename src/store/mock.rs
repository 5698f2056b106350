//! In-memory store doubles for tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{MatchmakeStore, NewUser, Room, RoomStore, StoreError, User, UserStore};

fn injected() -> StoreError {
    StoreError::Other("injected failure".to_string())
}

/// User store held in a map, with injectable failures and recorded
/// balance writes
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
    pub fail_get: AtomicBool,
    pub balance_updates: Mutex<Vec<(Uuid, i64)>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, login: &str, github_id: i64, gnu_balance: i64) -> User {
        let now = chrono::Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            github_id,
            github_login: login.to_string(),
            gnu_balance,
            rate: 1500,
            encrypted_token: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.users.lock().insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_id(&self, id: Uuid) -> Result<User, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.users.lock().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_github_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .lock()
            .values()
            .find(|u| u.github_login == login)
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        Ok(self.add_user(&new.github_login, new.github_id, 1000))
    }

    async fn update_gnu_balance(&self, id: Uuid, balance: i64) -> Result<(), StoreError> {
        self.balance_updates.lock().push((id, balance));
        if let Some(user) = self.users.lock().get_mut(&id) {
            user.gnu_balance = balance;
        }
        Ok(())
    }
}

/// Room store that records created rooms
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: Mutex<HashMap<Uuid, Room>>,
    pub fail_create: AtomicBool,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.rooms.lock().len()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create(&self, room: &Room) -> Result<(), StoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.rooms.lock().insert(room.id, room.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Room, StoreError> {
        self.rooms.lock().get(&id).cloned().ok_or(StoreError::NotFound)
    }
}

/// FIFO queue + active set, mirroring the contract of the Redis store
#[derive(Default)]
pub struct MemoryMatchmakeStore {
    queue: Mutex<VecDeque<Uuid>>,
    active: Mutex<HashSet<Uuid>>,
    pub fail_enqueue: AtomicBool,
    pub fail_dequeue: AtomicBool,
}

impl MemoryMatchmakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_snapshot(&self) -> Vec<Uuid> {
        self.queue.lock().iter().copied().collect()
    }

    pub fn is_active(&self, user_id: Uuid) -> bool {
        self.active.lock().contains(&user_id)
    }
}

#[async_trait]
impl MatchmakeStore for MemoryMatchmakeStore {
    async fn enqueue(&self, user_id: Uuid) -> Result<(), StoreError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.queue.lock().push_back(user_id);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<(Uuid, Uuid)>, StoreError> {
        if self.fail_dequeue.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let mut queue = self.queue.lock();
        if queue.len() < 2 {
            return Ok(None);
        }
        let first = queue.pop_front().expect("len checked");
        let second = queue.pop_front().expect("len checked");
        Ok(Some((first, second)))
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut queue = self.queue.lock();
        if let Some(pos) = queue.iter().position(|id| *id == user_id) {
            queue.remove(pos);
        }
        Ok(())
    }

    async fn set_active(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.active.lock().insert(user_id))
    }

    async fn clear_active(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.active.lock().remove(&user_id);
        Ok(())
    }
}
