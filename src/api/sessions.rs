//! Session minting API.
//!
//! The quoting backend authenticates a user and then mints a credlink session
//! for them here; the returned bearer token is handed to the SPA. In
//! deployment this endpoint sits on the internal network and is guarded by a
//! shared admin token.

use crate::session::SessionRegistry;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared state for the session API
#[derive(Clone)]
pub struct SessionAppState {
    pub sessions: Arc<SessionRegistry>,
    /// Shared secret required in the Authorization header; None disables the
    /// guard (local development)
    pub admin_token: Option<String>,
    pub auth_enabled: bool,
}

/// Request to mint a session
#[derive(Deserialize)]
pub struct MintSessionRequest {
    pub user_id: String,
}

/// Response with the minted bearer token
#[derive(Serialize, Deserialize)]
pub struct MintSessionResponse {
    pub token: String,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

enum SessionError {
    AuthDisabled,
    Unauthorized,
    BadRequest(String),
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            SessionError::AuthDisabled => (
                StatusCode::CONFLICT,
                "Sessions are not used when auth is disabled".to_string(),
            ),
            SessionError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Invalid admin token".to_string())
            }
            SessionError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Create the session API router
pub fn create_session_router(state: SessionAppState) -> Router {
    Router::new()
        .route("/api/sessions", post(mint_session))
        .with_state(Arc::new(state))
}

/// POST /api/sessions - Mint a session for a user
async fn mint_session(
    State(state): State<Arc<SessionAppState>>,
    headers: HeaderMap,
    Json(request): Json<MintSessionRequest>,
) -> Result<Json<MintSessionResponse>, SessionError> {
    if !state.auth_enabled {
        return Err(SessionError::AuthDisabled);
    }

    // Require admin token if configured
    if let Some(ref expected) = state.admin_token {
        let provided = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected.as_str()) {
            return Err(SessionError::Unauthorized);
        }
    }

    if request.user_id.trim().is_empty() {
        return Err(SessionError::BadRequest("user_id is required".to_string()));
    }

    let token = state.sessions.issue(&request.user_id);
    info!(user_id = %request.user_id, "Session minted");

    Ok(Json(MintSessionResponse { token }))
}
