//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::bot::run_bot_player;
use crate::http::middleware::{require_auth, AuthenticatedLogin};
use crate::matchmaking::MatchError;
use crate::store::User;
use crate::ws::matchmake::matchmake_handler;
use crate::ws::room::room_handler;

/// How long a dev bot waits for its pairing before giving up
const BOT_MATCH_WAIT: Duration = Duration::from_secs(60);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/matchmake", get(matchmake_handler))
        .route("/ws/room/:room_id", get(room_handler));

    let protected_routes = Router::new()
        .route("/api/v1/users/me", get(me_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let mut router = Router::new().merge(public_routes).merge(protected_routes);

    if state.config.is_development() {
        info!("dev routes enabled");
        router = router.nest(
            "/api/dev",
            Router::new()
                .route("/enqueue-test-user", post(enqueue_test_user_handler))
                .route("/start-bot-match", post(start_bot_match_handler)),
        );
    }

    router.layer(TraceLayer::new_for_http()).layer(cors).with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    live_rooms: usize,
    matchmaking_connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        live_rooms: state.room_manager.live_count(),
        matchmaking_connections: state.hub.connection_count(),
    })
}

// ============================================================================
// User endpoint
// ============================================================================

async fn me_handler(
    State(state): State<AppState>,
    Extension(login): Extension<AuthenticatedLogin>,
) -> Result<Json<User>, AppError> {
    match state.users.get_by_github_login(&login.0).await {
        Ok(Some(user)) => Ok(Json(user)),
        Ok(None) => Err(AppError::NotFound("user is not registered".to_string())),
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}

// ============================================================================
// Dev endpoints (development builds of the deployment only)
// ============================================================================

#[derive(Serialize)]
struct DevEnqueueResponse {
    message: &'static str,
    user_id: Uuid,
}

async fn get_or_create_dev_user(
    state: &AppState,
    login: &str,
    github_id: i64,
) -> Result<User, AppError> {
    crate::ws::resolve_user(state, login, Some(github_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::Internal("dev user creation failed".to_string()))
}

/// Create the synthetic test player and put it in the queue
async fn enqueue_test_user_handler(
    State(state): State<AppState>,
) -> Result<Json<DevEnqueueResponse>, AppError> {
    let user = get_or_create_dev_user(&state, "test-bot", 999_999_999).await?;

    match state.matchmaking.join_queue(user.id).await {
        Ok(()) => {
            info!(user_id = %user.id, "test-bot enqueued");
            Ok(Json(DevEnqueueResponse { message: "test-bot enqueued", user_id: user.id }))
        }
        Err(MatchError::AlreadyInQueue) => {
            Err(AppError::Conflict("test-bot is already in queue".to_string()))
        }
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}

/// As above, plus an in-process bot that joins the room and plays
async fn start_bot_match_handler(
    State(state): State<AppState>,
) -> Result<Json<DevEnqueueResponse>, AppError> {
    let bot = get_or_create_dev_user(&state, "match-bot", 999_999_998).await?;

    let (notice_tx, mut notice_rx) = mpsc::channel(1);
    state.hub.subscribe_match(bot.id, notice_tx);

    if let Err(e) = state.matchmaking.join_queue(bot.id).await {
        state.hub.unsubscribe_match(bot.id);
        return Err(match e {
            MatchError::AlreadyInQueue => {
                AppError::Conflict("match-bot is already in queue".to_string())
            }
            other => AppError::Internal(other.to_string()),
        });
    }

    let hub = state.hub.clone();
    let matchmaking = state.matchmaking.clone();
    let server_addr = state.config.bot_server_addr.clone();
    let origin = state
        .config
        .allowed_origins
        .first()
        .cloned()
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let bot_user = bot.clone();

    tokio::spawn(async move {
        match timeout(BOT_MATCH_WAIT, notice_rx.recv()).await {
            Ok(Some(notice)) => {
                run_bot_player(&server_addr, notice.room_id, &bot_user, &origin).await;
            }
            Ok(None) => debug!(user_id = %bot_user.id, "bot match subscription dropped"),
            Err(_) => {
                warn!(user_id = %bot_user.id, "bot was never paired, leaving the queue");
                if let Err(e) = matchmaking.leave_queue(bot_user.id).await {
                    warn!(user_id = %bot_user.id, error = %e, "failed to dequeue idle bot");
                }
            }
        }
        hub.unsubscribe_match(bot_user.id);
    });

    info!(user_id = %bot.id, "match-bot enqueued");
    Ok(Json(DevEnqueueResponse { message: "match-bot enqueued", user_id: bot.id }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
