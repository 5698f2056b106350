//! Authentication middleware and origin checks
//!
//! Control-plane routes carry `Authorization: Bearer <oauth-token>`; the
//! token is validated by a round-trip to the GitHub `/user` endpoint and
//! the resolved login rides along in the request extensions.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::app::AppState;

const GITHUB_USER_API: &str = "https://api.github.com/user";

/// The subset of the provider's `/user` response we need
#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Identity provider unavailable")]
    ProviderUnavailable,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingHeader => StatusCode::UNAUTHORIZED,
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::ProviderUnavailable => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

/// Login resolved from a validated bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedLogin(pub String);

/// Extract the token from an Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Validate a bearer token against the identity provider
pub async fn resolve_github_login(
    client: &reqwest::Client,
    token: &str,
) -> Result<String, AuthError> {
    let response = client
        .get(GITHUB_USER_API)
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
        .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
        .header(reqwest::header::USER_AGENT, "quiz-duel-server")
        .send()
        .await
        .map_err(|_| AuthError::ProviderUnavailable)?;

    if !response.status().is_success() {
        return Err(AuthError::InvalidToken);
    }

    let user: GitHubUser = response.json().await.map_err(|_| AuthError::InvalidToken)?;
    if user.login.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(user.login)
}

/// Middleware to require authentication on control-plane routes
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;
    let login = resolve_github_login(&state.http, token).await?;

    request.extensions_mut().insert(AuthenticatedLogin(login));
    Ok(next.run(request).await)
}

/// Upgrade routes accept only the configured origins
pub fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|origin| allowed.iter().any(|candidate| candidate == origin))
        .unwrap_or(false)
}
