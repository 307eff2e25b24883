//! OAuth 2.0 connection API.
//!
//! Authorization code flow:
//! 1. SPA calls GET /api/oauth/start → redirect to provider consent screen
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back to the SPA's callback URL with code + state
//! 4. SPA posts the code (state in the query string) to /api/oauth/exchange
//! 5. Tokens are exchanged, encrypted, and stored; the user is "connected"
//!
//! From then on, consumers POST /api/oauth/token for a live access token and
//! POST /api/oauth/disconnect to revoke the connection.

mod state_manager;

pub use state_manager::{run_state_cleanup, PendingAuth, StateManager};

use crate::auth::extract_bearer_token;
use crate::config::ProviderConfig;
use crate::session::SessionRegistry;
use crate::tokens::exchange::ExchangeError;
use crate::tokens::{ActiveTokenProvider, ConnectError};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for OAuth endpoints
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Shared application state for the OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub tokens: Arc<ActiveTokenProvider>,
    pub sessions: Arc<SessionRegistry>,
    pub state_manager: StateManager,
    pub provider: ProviderConfig,
    pub auth_enabled: bool,
}

/// Query parameters on POST /api/oauth/exchange (forwarded from the
/// provider's redirect, never part of the body)
#[derive(Deserialize)]
pub struct ExchangeQuery {
    state: Option<String>,
}

/// Request body for POST /api/oauth/exchange
#[derive(Deserialize)]
pub struct ExchangeRequest {
    code: String,
}

/// Response for a completed exchange
#[derive(Serialize)]
pub struct ExchangeResponse {
    connected: bool,
}

/// Response for POST /api/oauth/token
#[derive(Serialize)]
pub struct ActiveTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

/// Response for GET /api/oauth/status
#[derive(Serialize)]
pub struct StatusResponse {
    connected: bool,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

/// Response for POST /api/oauth/disconnect
#[derive(Serialize)]
pub struct DisconnectResponse {
    deleted: bool,
}

/// Create the OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/oauth/start", get(oauth_start))
        .route("/api/oauth/exchange", post(oauth_exchange))
        .route("/api/oauth/token", post(active_token))
        .route("/api/oauth/status", get(connection_status))
        .route("/api/oauth/disconnect", post(disconnect))
        .with_state(Arc::new(state))
}

/// Resolve the calling user from the bearer session token.
fn authenticate(state: &OAuthAppState, headers: &HeaderMap) -> Result<String, AppError> {
    if !state.auth_enabled {
        // No-auth mode (local development): single default user
        return Ok("default".to_string());
    }

    let token = extract_bearer_token(headers)
        .map_err(|e| AppError::Unauthorized(format!("Invalid session: {}", e)))?;

    state
        .sessions
        .resolve(&token)
        .ok_or_else(|| AppError::Unauthorized("Unknown or expired session".to_string()))
}

/// GET /api/oauth/start
///
/// Begins the authorization flow: binds a fresh CSRF state nonce to the
/// calling user and redirects to the provider's consent screen.
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let csrf_state = state.state_manager.create(&user_id);
    let auth_url = state.provider.build_auth_url(&csrf_state);

    info!(user_id = %user_id, "Redirecting to provider consent screen");
    Ok(Redirect::temporary(&auth_url))
}

/// POST /api/oauth/exchange?state=...
///
/// Completes the authorization-code grant. The state nonce from the
/// provider's redirect must verify against one this service issued, bound to
/// the same user the bearer session resolves to.
async fn oauth_exchange(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
    Query(query): Query<ExchangeQuery>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Json<ExchangeResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let csrf_state = query
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    if request.code.trim().is_empty() {
        return Err(AppError::BadRequest("Missing authorization code".to_string()));
    }

    debug!(user_id = %user_id, "Validating CSRF state");
    let pending = state.state_manager.consume(&csrf_state).ok_or_else(|| {
        warn!(user_id = %user_id, "Invalid or expired OAuth state");
        AppError::Unauthorized("Invalid or expired OAuth state".to_string())
    })?;

    if pending.user_id != user_id {
        warn!(
            bound_user = %pending.user_id,
            caller = %user_id,
            "OAuth state bound to a different user"
        );
        return Err(AppError::Unauthorized(
            "OAuth state does not belong to this session".to_string(),
        ));
    }

    state
        .tokens
        .connect(&user_id, &request.code)
        .await
        .map_err(|e| match e {
            ConnectError::Exchange(ExchangeError::InvalidGrant(reason)) => {
                warn!(user_id = %user_id, reason = %reason, "Provider rejected authorization code");
                AppError::BadRequest("Authorization code was rejected".to_string())
            }
            ConnectError::Exchange(err) => {
                warn!(user_id = %user_id, error = %err, "Provider token exchange failed");
                AppError::BadGateway("Provider token exchange failed".to_string())
            }
            ConnectError::Internal(err) => {
                error!(user_id = %user_id, error = %err, "Failed to persist connection");
                AppError::ServerError("Failed to store connection".to_string())
            }
        })?;

    Ok(Json(ExchangeResponse { connected: true }))
}

/// POST /api/oauth/token
///
/// Returns an access token currently valid for the calling user, refreshing
/// transparently when the stored one is expired or about to expire. 404 means
/// "not connected", which the SPA renders as the Connect button.
async fn active_token(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<ActiveTokenResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let token = state.tokens.active_token(&user_id).await.map_err(|e| {
        error!(user_id = %user_id, error = %e, "Active token lookup failed");
        AppError::ServerError("Token lookup failed".to_string())
    })?;

    match token {
        Some(access_token) => Ok(Json(ActiveTokenResponse { access_token })),
        None => Err(AppError::NotFound("No provider connection".to_string())),
    }
}

/// GET /api/oauth/status
///
/// Connection metadata for the UI. Never refreshes and never returns token
/// material.
async fn connection_status(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let status = state.tokens.status(&user_id).map_err(|e| {
        error!(user_id = %user_id, error = %e, "Status lookup failed");
        AppError::ServerError("Status lookup failed".to_string())
    })?;

    Ok(Json(match status {
        Some(s) => StatusResponse {
            connected: true,
            expires_at: Some(s.expires_at.to_rfc3339()),
        },
        None => StatusResponse {
            connected: false,
            expires_at: None,
        },
    }))
}

/// POST /api/oauth/disconnect
///
/// Deletes the stored connection. Idempotent: disconnecting an already
/// disconnected user succeeds with `deleted: false`.
async fn disconnect(
    State(state): State<Arc<OAuthAppState>>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let deleted = state.tokens.disconnect(&user_id).await.map_err(|e| {
        error!(user_id = %user_id, error = %e, "Disconnect failed");
        AppError::ServerError("Disconnect failed".to_string())
    })?;

    Ok(Json(DisconnectResponse { deleted }))
}
