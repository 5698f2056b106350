//! Matchmaking: shared queue store, pairing service, connection hub

pub mod hub;
pub mod service;
pub mod store;

pub use hub::Hub;
pub use service::{MatchError, MatchResult, MatchmakingService};
pub use store::RedisMatchmakeStore;
