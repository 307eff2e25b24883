//! Encrypted provider-credential storage.
//!
//! One connection per application user: the access and refresh tokens issued
//! by the external provider, AES-256-GCM encrypted, persisted in SQLite
//! together with the access token's expiry. The store only ever sees
//! ciphertext blobs; encryption and decryption happen in [`TokenCipher`],
//! owned by the callers.

use chrono::{DateTime, Utc};

mod encryption;
mod store;

pub use encryption::{CryptoError, TokenCipher};
pub use store::{ConnectionStore, StoreError};

/// Encrypted token material written on every exchange or refresh.
///
/// Both token fields are opaque ciphertext blobs produced by [`TokenCipher`].
#[derive(Clone, Debug)]
pub struct EncryptedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// When the (plaintext) access token stops being valid
    pub expires_at: DateTime<Utc>,
}

/// A stored provider connection, as read back from the store.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub user_id: String,
    /// Encrypted access token blob
    pub access_token: String,
    /// Encrypted refresh token blob
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
