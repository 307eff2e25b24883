//! Token lifecycle management.
//!
//! [`ActiveTokenProvider`] is the single call site every provider-API consumer
//! uses: "give me a token I can use right now for this user". It completes the
//! initial authorization-code exchange, transparently refreshes expiring
//! access tokens, and handles disconnects. Refreshes for the same user are
//! serialized behind a per-user async lock so two concurrent callers cannot
//! clobber each other's freshly-issued refresh token.

use crate::config::ProviderConfig;
use crate::credentials::{ConnectionStore, CryptoError, EncryptedTokens, StoreError, TokenCipher};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod exchange;

use exchange::{exchange_code, refresh_grant, ExchangeError};

/// Internal failures of the token service (persistence or cryptography).
///
/// Domain outcomes (not connected, provider said no) are not errors; they
/// surface as `Ok(None)` from [`ActiveTokenProvider::active_token`].
#[derive(Debug)]
pub enum TokenServiceError {
    Store(StoreError),
    Crypto(CryptoError),
}

impl std::fmt::Display for TokenServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenServiceError::Store(e) => write!(f, "token service store failure: {}", e),
            TokenServiceError::Crypto(e) => write!(f, "token service crypto failure: {}", e),
        }
    }
}

impl std::error::Error for TokenServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TokenServiceError::Store(e) => Some(e),
            TokenServiceError::Crypto(e) => Some(e),
        }
    }
}

impl From<StoreError> for TokenServiceError {
    fn from(e: StoreError) -> Self {
        TokenServiceError::Store(e)
    }
}

impl From<CryptoError> for TokenServiceError {
    fn from(e: CryptoError) -> Self {
        TokenServiceError::Crypto(e)
    }
}

/// Failures of the initial connect (authorization-code exchange).
#[derive(Debug)]
pub enum ConnectError {
    /// The provider call failed; the variant decides the HTTP mapping
    Exchange(ExchangeError),
    /// Persistence or cryptography failed after a successful exchange
    Internal(TokenServiceError),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Exchange(e) => write!(f, "{}", e),
            ConnectError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<ExchangeError> for ConnectError {
    fn from(e: ExchangeError) -> Self {
        ConnectError::Exchange(e)
    }
}

impl From<StoreError> for ConnectError {
    fn from(e: StoreError) -> Self {
        ConnectError::Internal(TokenServiceError::Store(e))
    }
}

impl From<CryptoError> for ConnectError {
    fn from(e: CryptoError) -> Self {
        ConnectError::Internal(TokenServiceError::Crypto(e))
    }
}

/// Connection metadata safe to show to the UI (no token material).
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serves currently-valid access tokens, refreshing on demand.
pub struct ActiveTokenProvider {
    store: Arc<ConnectionStore>,
    cipher: Arc<TokenCipher>,
    http: reqwest::Client,
    provider: ProviderConfig,
    /// Refresh this far ahead of actual expiry, so a token returned to a
    /// caller survives the caller's own subsequent provider request
    expiry_buffer: Duration,
    /// Per-user critical section around check-expiry -> refresh -> persist.
    /// Entries live for the process lifetime; the map is bounded by the
    /// number of distinct users served.
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ActiveTokenProvider {
    pub fn new(
        store: Arc<ConnectionStore>,
        cipher: Arc<TokenCipher>,
        http: reqwest::Client,
        provider: ProviderConfig,
        expiry_buffer_seconds: i64,
    ) -> Self {
        Self {
            store,
            cipher,
            http,
            provider,
            expiry_buffer: Duration::seconds(expiry_buffer_seconds),
            refresh_locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Complete the authorization-code exchange and persist the connection.
    ///
    /// The code grant must return a refresh token; a provider response
    /// without one cannot support silent renewal and is rejected as
    /// malformed.
    pub async fn connect(&self, user_id: &str, code: &str) -> Result<(), ConnectError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let grant = exchange_code(
            &self.http,
            &self.provider.token_url,
            code,
            &self.provider.redirect_uri,
            &self.provider.client_id,
            &self.provider.client_secret,
        )
        .await?;

        let refresh_token = grant.refresh_token.as_deref().ok_or_else(|| {
            ExchangeError::MalformedResponse(
                "code grant response carried no refresh_token".to_string(),
            )
        })?;

        let tokens = EncryptedTokens {
            access_token: self.cipher.encrypt(&grant.access_token)?,
            refresh_token: self.cipher.encrypt(refresh_token)?,
            expires_at: grant.expires_at,
        };
        self.store.upsert(user_id, &tokens)?;

        info!(
            user_id = %user_id,
            expires_at = %grant.expires_at,
            "Provider connection established"
        );
        Ok(())
    }

    /// Return an access token currently valid for this user, or `None` if the
    /// user is not connected (or the connection became unusable).
    ///
    /// Fresh tokens are served straight from the store with no network call.
    /// Expiring tokens are renewed via the refresh grant inside the per-user
    /// lock; a transient provider failure yields `None` without touching the
    /// stored connection, so the next caller simply retries.
    pub async fn active_token(&self, user_id: &str) -> Result<Option<String>, TokenServiceError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let Some(record) = self.store.get(user_id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        if now < record.expires_at - self.expiry_buffer {
            return match self.cipher.decrypt(&record.access_token) {
                Ok(token) => {
                    debug!(user_id = %user_id, "Serving stored access token");
                    Ok(Some(token))
                }
                Err(e) if connection_unusable(&e) => {
                    warn!(user_id = %user_id, error = %e, "Stored access token unusable, dropping connection");
                    self.store.delete(user_id)?;
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            };
        }

        // Token is expired or inside the buffer: renew it
        let refresh_plain = match self.cipher.decrypt(&record.refresh_token) {
            Ok(token) => token,
            Err(e) if connection_unusable(&e) => {
                warn!(user_id = %user_id, error = %e, "Stored refresh token unusable, dropping connection");
                self.store.delete(user_id)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match refresh_grant(
            &self.http,
            &self.provider.token_url,
            &refresh_plain,
            &self.provider.client_id,
            &self.provider.client_secret,
        )
        .await
        {
            Ok(grant) => {
                // Providers may not rotate the refresh token on renewal; the
                // previous one is then kept, never blanked
                let refresh_to_store = grant.refresh_token.as_deref().unwrap_or(&refresh_plain);

                let tokens = EncryptedTokens {
                    access_token: self.cipher.encrypt(&grant.access_token)?,
                    refresh_token: self.cipher.encrypt(refresh_to_store)?,
                    expires_at: grant.expires_at,
                };
                self.store.upsert(user_id, &tokens)?;

                info!(
                    user_id = %user_id,
                    rotated_refresh_token = grant.refresh_token.is_some(),
                    expires_at = %grant.expires_at,
                    "Access token refreshed"
                );
                Ok(Some(grant.access_token))
            }
            Err(ExchangeError::InvalidGrant(reason)) => {
                // The refresh token is permanently dead; silent renewal can
                // never succeed again, so force a fresh authorization
                warn!(
                    user_id = %user_id,
                    reason = %reason,
                    "Refresh token rejected, deleting connection"
                );
                self.store.delete(user_id)?;
                Ok(None)
            }
            Err(e) => {
                // Transient (or malformed) failure: leave the stored row in
                // its prior state for the next caller to retry
                warn!(user_id = %user_id, error = %e, "Token refresh failed, connection kept");
                Ok(None)
            }
        }
    }

    /// Delete the user's stored connection. Idempotent: returns whether a
    /// connection existed.
    pub async fn disconnect(&self, user_id: &str) -> Result<bool, TokenServiceError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let deleted = self.store.delete(user_id)?;
        if deleted {
            info!(user_id = %user_id, "Provider connection removed");
        } else {
            debug!(user_id = %user_id, "Disconnect for user with no connection");
        }
        Ok(deleted)
    }

    /// Connection metadata for status displays. Never decrypts and never
    /// refreshes.
    pub fn status(&self, user_id: &str) -> Result<Option<ConnectionStatus>, TokenServiceError> {
        let record = self.store.get(user_id)?;
        Ok(record.map(|r| ConnectionStatus {
            expires_at: r.expires_at,
            updated_at: r.updated_at,
        }))
    }
}

/// Ciphertext that cannot be decrypted can never be forced to unexpire; the
/// connection it belongs to is unusable.
fn connection_unusable(e: &CryptoError) -> bool {
    matches!(e, CryptoError::Integrity | CryptoError::InvalidInput(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn test_cipher() -> Arc<TokenCipher> {
        Arc::new(TokenCipher::new(&BASE64.encode([3u8; 32])).unwrap())
    }

    fn test_provider_config(token_url: &str) -> ProviderConfig {
        ProviderConfig {
            auth_url: "https://provider.example.com/authorize".to_string(),
            token_url: token_url.to_string(),
            scopes: vec!["read".to_string()],
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
        }
    }

    fn build_provider(token_url: &str) -> (ActiveTokenProvider, Arc<ConnectionStore>, Arc<TokenCipher>) {
        let store = Arc::new(ConnectionStore::open(":memory:").unwrap());
        let cipher = test_cipher();
        let provider = ActiveTokenProvider::new(
            Arc::clone(&store),
            Arc::clone(&cipher),
            reqwest::Client::new(),
            test_provider_config(token_url),
            60,
        );
        (provider, store, cipher)
    }

    fn seed_connection(
        store: &ConnectionStore,
        cipher: &TokenCipher,
        user_id: &str,
        access: &str,
        refresh: &str,
        expires_at: DateTime<Utc>,
    ) {
        let tokens = EncryptedTokens {
            access_token: cipher.encrypt(access).unwrap(),
            refresh_token: cipher.encrypt(refresh).unwrap(),
            expires_at,
        };
        store.upsert(user_id, &tokens).unwrap();
    }

    #[tokio::test]
    async fn test_not_connected_returns_none() {
        let (provider, _store, _cipher) = build_provider("http://127.0.0.1:1/token");
        assert_eq!(provider.active_token("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fresh_token_served_without_provider_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);
        seed_connection(
            &store,
            &cipher,
            "u1",
            "A1",
            "R1",
            Utc::now() + Duration::hours(1),
        );

        let token = provider.active_token("u1").await.unwrap();
        assert_eq!(token, Some("A1".to_string()));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_token_triggers_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                mockito::Matcher::UrlEncoded("refresh_token".into(), "R1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A2","refresh_token":"R2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);
        // Inside the 60s buffer: expires in 30s
        seed_connection(
            &store,
            &cipher,
            "u1",
            "A1",
            "R1",
            Utc::now() + Duration::seconds(30),
        );

        let token = provider.active_token("u1").await.unwrap();
        assert_eq!(token, Some("A2".to_string()));

        // New tokens persisted, encrypted
        let record = store.get("u1").unwrap().unwrap();
        assert_eq!(cipher.decrypt(&record.access_token).unwrap(), "A2");
        assert_eq!(cipher.decrypt(&record.refresh_token).unwrap(), "R2");
        assert!(record.expires_at > Utc::now() + Duration::seconds(3500));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_token_carry_over() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A2","expires_in":3600}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);
        seed_connection(
            &store,
            &cipher,
            "u1",
            "A1",
            "R1",
            Utc::now() - Duration::seconds(10),
        );

        let token = provider.active_token("u1").await.unwrap();
        assert_eq!(token, Some("A2".to_string()));

        // Provider rotated nothing: the old refresh token is kept
        let record = store.get("u1").unwrap().unwrap();
        assert_eq!(cipher.decrypt(&record.refresh_token).unwrap(), "R1");
    }

    #[tokio::test]
    async fn test_invalid_grant_on_refresh_deletes_connection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);
        seed_connection(
            &store,
            &cipher,
            "u1",
            "A1",
            "R1",
            Utc::now() - Duration::seconds(10),
        );

        assert_eq!(provider.active_token("u1").await.unwrap(), None);

        // Connection destroyed: re-authorization required
        assert!(store.get("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provider_outage_keeps_connection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(500)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);
        seed_connection(
            &store,
            &cipher,
            "u1",
            "A1",
            "R1",
            Utc::now() - Duration::seconds(10),
        );

        // Transient failure must not look like permanent disconnection
        assert_eq!(provider.active_token("u1").await.unwrap(), None);
        assert!(store.get("u1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_ciphertext_drops_connection() {
        let (provider, store, _cipher) = build_provider("http://127.0.0.1:1/token");

        // Blobs that were never produced by this cipher
        let tokens = EncryptedTokens {
            access_token: BASE64.encode([0u8; 40]),
            refresh_token: BASE64.encode([0u8; 40]),
            expires_at: Utc::now() + Duration::hours(1),
        };
        store.upsert("u1", &tokens).unwrap();

        assert_eq!(provider.active_token("u1").await.unwrap(), None);
        assert!(store.get("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_requires_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A1","expires_in":3600}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, _cipher) = build_provider(&url);

        let err = provider.connect("u1", "abc").await.expect_err("must fail");
        assert!(matches!(
            err,
            ConnectError::Exchange(ExchangeError::MalformedResponse(_))
        ));
        assert!(store.get("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_persists_encrypted_tokens() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "abc".into()),
                mockito::Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "https://app.example.com/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A1","refresh_token":"R1","expires_in":3600}"#)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);

        provider.connect("u1", "abc").await.expect("connect");

        let record = store.get("u1").unwrap().unwrap();
        // Stored blobs are ciphertext, not the raw tokens
        assert_ne!(record.access_token, "A1");
        assert_ne!(record.refresh_token, "R1");
        assert_eq!(cipher.decrypt(&record.access_token).unwrap(), "A1");
        assert_eq!(cipher.decrypt(&record.refresh_token).unwrap(), "R1");

        let expires_in = record.expires_at - Utc::now();
        assert!(expires_in > Duration::seconds(3500) && expires_in <= Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let (provider, store, cipher) = build_provider("http://127.0.0.1:1/token");
        seed_connection(
            &store,
            &cipher,
            "u1",
            "A1",
            "R1",
            Utc::now() + Duration::hours(1),
        );

        assert!(provider.disconnect("u1").await.unwrap());
        assert!(!provider.disconnect("u1").await.unwrap());
        assert_eq!(provider.active_token("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_reports_without_refreshing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;

        let url = format!("{}/token", server.url());
        let (provider, store, cipher) = build_provider(&url);
        assert!(provider.status("u1").unwrap().is_none());

        // Even an expired connection is only reported, never renewed here
        let expires_at = Utc::now() - Duration::seconds(10);
        seed_connection(&store, &cipher, "u1", "A1", "R1", expires_at);

        let status = provider.status("u1").unwrap().unwrap();
        assert_eq!(status.expires_at, expires_at);

        mock.assert_async().await;
    }
}
