//! OAuth 2.0 token endpoint client.
//!
//! Two grants against the same endpoint: `authorization_code` for the initial
//! connect, `refresh_token` for silent renewal. No retries here; callers own
//! retry policy.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Applied when the provider omits `expires_in` from a token response.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth error response body (RFC 6749 §5.2)
#[derive(Deserialize, Debug, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Outcome of a successful grant
#[derive(Clone, Debug)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when a refresh grant does not rotate the refresh token
    pub refresh_token: Option<String>,
    /// `now + expires_in` computed at response time
    pub expires_at: DateTime<Utc>,
}

/// Token endpoint failures
#[derive(Debug)]
pub enum ExchangeError {
    /// The provider rejected the code or refresh token. Permanent for that
    /// credential; retrying with the same one can never succeed.
    InvalidGrant(String),
    /// Network failure, timeout, or provider 5xx. Transient.
    ProviderUnavailable(String),
    /// 2xx response whose body violates the token response schema.
    MalformedResponse(String),
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::InvalidGrant(msg) => write!(f, "provider rejected grant: {}", msg),
            ExchangeError::ProviderUnavailable(msg) => {
                write!(f, "provider unavailable: {}", msg)
            }
            ExchangeError::MalformedResponse(msg) => {
                write!(f, "malformed token response: {}", msg)
            }
        }
    }
}

impl std::error::Error for ExchangeError {}

/// Exchange an authorization code for tokens (initial connect).
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenGrant, ExchangeError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", redirect_uri);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    debug!(grant_type = "authorization_code", "Calling provider token endpoint");
    post_token_request(client, token_url, &form).await
}

/// Exchange a refresh token for a new access token (silent renewal).
pub async fn refresh_grant(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenGrant, ExchangeError> {
    let mut form = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", refresh_token);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    debug!(grant_type = "refresh_token", "Calling provider token endpoint");
    post_token_request(client, token_url, &form).await
}

async fn post_token_request(
    client: &reqwest::Client,
    token_url: &str,
    form: &HashMap<&str, &str>,
) -> Result<TokenGrant, ExchangeError> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| ExchangeError::ProviderUnavailable(e.to_string()))?;

    let status = response.status();

    if status.is_server_error() {
        return Err(ExchangeError::ProviderUnavailable(format!(
            "token endpoint returned {}",
            status
        )));
    }

    if !status.is_success() {
        // The body may carry an RFC 6749 error object; keep it for logs only
        let body = response.text().await.unwrap_or_default();
        let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        let error = parsed.error.unwrap_or_else(|| format!("http {}", status));
        let description = parsed.error_description.unwrap_or_default();
        return Err(ExchangeError::InvalidGrant(format!(
            "{} {}",
            error,
            description
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ExchangeError::ProviderUnavailable(e.to_string()))?;
    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| ExchangeError::MalformedResponse(e.to_string()))?;

    if token.access_token.is_empty() {
        return Err(ExchangeError::MalformedResponse(
            "access_token is empty".to_string(),
        ));
    }

    let expires_in = match token.expires_in {
        Some(seconds) => seconds,
        None => {
            warn!(
                fallback_seconds = DEFAULT_EXPIRES_IN_SECS,
                "Provider omitted expires_in, applying fallback"
            );
            DEFAULT_EXPIRES_IN_SECS
        }
    };

    debug!(
        has_refresh_token = token.refresh_token.is_some(),
        expires_in = expires_in,
        "Token grant succeeded"
    );

    Ok(TokenGrant {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}
