//! Application state shared across routes

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::game::RoomManager;
use crate::matchmaking::{Hub, MatchmakingService, RedisMatchmakeStore};
use crate::store::rooms::PgRoomStore;
use crate::store::users::PgUserStore;
use crate::store::{RoomStore, UserStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Client for identity-provider calls
    pub http: reqwest::Client,
    pub users: Arc<dyn UserStore>,
    pub rooms: Arc<dyn RoomStore>,
    pub matchmaking: Arc<MatchmakingService>,
    pub hub: Arc<Hub>,
    pub room_manager: Arc<RoomManager>,
    /// Root cancellation for the hub driver and room state machines
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool, matchmake_store: RedisMatchmakeStore) -> Self {
        let config = Arc::new(config);

        let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));
        let rooms: Arc<dyn RoomStore> = Arc::new(PgRoomStore::new(pool));

        let matchmaking = Arc::new(MatchmakingService::new(
            Arc::new(matchmake_store),
            users.clone(),
            rooms.clone(),
        ));
        let hub = Arc::new(Hub::new(matchmaking.clone()));
        let room_manager = Arc::new(RoomManager::new(users.clone()));

        Self {
            config,
            http: reqwest::Client::new(),
            users,
            rooms,
            matchmaking,
            hub,
            room_manager,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}
