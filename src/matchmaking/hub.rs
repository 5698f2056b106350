//! Connection hub - live matchmaking channels and the pairing driver

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::matchmaking::{MatchResult, MatchmakingService};
use crate::ws::protocol::{OpponentInfo, ServerEvent};

/// Fixed pairing cadence; invisible to a human and bounds store load
const PAIRING_TICK: Duration = Duration::from_millis(500);
/// Non-blocking send window for in-process match subscribers
const SUBSCRIBER_SEND_TIMEOUT: Duration = Duration::from_millis(200);
/// Bound on the queue cleanup a disconnect triggers
const UNREGISTER_LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Match notification for in-process subscribers (dev bot)
#[derive(Debug, Clone)]
pub struct MatchFound {
    pub room_id: Uuid,
    pub opponent_id: Uuid,
}

/// Registry of live matchmaking channels keyed by user id
pub struct Hub {
    connections: RwLock<HashMap<Uuid, mpsc::Sender<ServerEvent>>>,
    match_subs: RwLock<HashMap<Uuid, mpsc::Sender<MatchFound>>>,
    service: Arc<MatchmakingService>,
}

impl Hub {
    pub fn new(service: Arc<MatchmakingService>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            match_subs: RwLock::new(HashMap::new()),
            service,
        }
    }

    /// Register the outbox of a freshly upgraded matchmaking socket
    pub fn register(&self, user_id: Uuid, outbox: mpsc::Sender<ServerEvent>) {
        self.connections.write().insert(user_id, outbox);
    }

    /// Drop a registration and leave the queue (bounded; a hung store
    /// call must not pin the socket task)
    pub async fn unregister(&self, user_id: Uuid) {
        self.connections.write().remove(&user_id);

        match timeout(UNREGISTER_LEAVE_TIMEOUT, self.service.leave_queue(user_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(user_id = %user_id, error = %e, "failed to leave queue on unregister"),
            Err(_) => warn!(user_id = %user_id, "leave queue timed out on unregister"),
        }
    }

    /// Subscribe to match results in-process instead of over the wire
    pub fn subscribe_match(&self, user_id: Uuid, sink: mpsc::Sender<MatchFound>) {
        self.match_subs.write().insert(user_id, sink);
    }

    pub fn unsubscribe_match(&self, user_id: Uuid) {
        self.match_subs.write().remove(&user_id);
    }

    /// Deliver one event to a registered player. Delivery failures are
    /// logged; only the socket task's own exit unregisters a channel.
    pub fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let outbox = self.connections.read().get(&user_id).cloned();
        let Some(outbox) = outbox else {
            return;
        };
        if let Err(e) = outbox.try_send(event) {
            warn!(user_id = %user_id, error = %e, "failed to deliver matchmaking event");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Pairing driver: one `try_match` per tick until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tick = interval(PAIRING_TICK);
        info!("hub: pairing loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("hub: pairing loop stopped");
                    return;
                }
                _ = tick.tick() => {}
            }

            match self.service.try_match().await {
                Ok(Some(result)) => self.dispatch_match(&result).await,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "pairing attempt failed"),
            }
        }
    }

    async fn dispatch_match(&self, result: &MatchResult) {
        info!(
            room_id = %result.room.id,
            player1 = %result.player1.github_login,
            player2 = %result.player2.github_login,
            "match found"
        );

        for (me, opponent) in [
            (&result.player1, &result.player2),
            (&result.player2, &result.player1),
        ] {
            let sub = self.match_subs.read().get(&me.id).cloned();
            if let Some(sink) = sub {
                let notice = MatchFound { room_id: result.room.id, opponent_id: opponent.id };
                let delivered = timeout(SUBSCRIBER_SEND_TIMEOUT, sink.send(notice)).await;
                if !matches!(delivered, Ok(Ok(()))) {
                    debug!(user_id = %me.id, "match subscriber slow or gone, dropping notice");
                }
            }

            self.send_to_user(
                me.id,
                ServerEvent::EvMatchFound {
                    room_id: result.room.id,
                    opponent: OpponentInfo {
                        id: opponent.id,
                        github_login: opponent.github_login.clone(),
                        rate: opponent.rate,
                        gnu_balance: None,
                    },
                },
            );
        }
    }
}
