//! SQLite persistence for provider connections.
//!
//! # Schema
//! ```sql
//! CREATE TABLE connections (
//!     user_id TEXT PRIMARY KEY,
//!     access_token TEXT NOT NULL,   -- Encrypted blob
//!     refresh_token TEXT NOT NULL,  -- Encrypted blob
//!     expires_at TEXT NOT NULL,     -- ISO 8601 timestamp
//!     created_at TEXT NOT NULL,     -- ISO 8601 timestamp
//!     updated_at TEXT NOT NULL      -- ISO 8601 timestamp
//! );
//! ```
//!
//! The store never sees token plaintext: both token columns hold ciphertext
//! blobs produced by the codec. One upsert changes exactly one row.
//!
//! # Thread Safety
//! Connection is wrapped in Mutex for safe concurrent access; SQLite itself
//! runs in serialized mode.

use super::{ConnectionRecord, EncryptedTokens};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Persistence errors, with the underlying cause preserved for logging.
///
/// Never surfaced verbatim to API callers; the endpoint boundary maps this
/// to a generic 500.
#[derive(Debug)]
pub enum StoreError {
    /// SQLite operation failed
    Database(rusqlite::Error),
    /// A stored row could not be read back (bad timestamp)
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "connection store database error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "connection store row corrupt: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            StoreError::Corrupt(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e)
    }
}

/// Durable CRUD for connection rows, keyed by `user_id`.
pub struct ConnectionStore {
    conn: Mutex<Connection>,
}

impl ConnectionStore {
    /// Create or open a connection store.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                user_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch the connection for a user, if one exists.
    pub fn get(&self, user_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT access_token, refresh_token, expires_at, created_at, updated_at
                FROM connections
                WHERE user_id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((access_token, refresh_token, expires_at, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(ConnectionRecord {
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            expires_at: parse_timestamp("expires_at", &expires_at)?,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        }))
    }

    /// Insert or replace the connection for a user.
    ///
    /// `updated_at` is stamped on every write; `created_at` survives
    /// replacement of an existing row.
    pub fn upsert(&self, user_id: &str, tokens: &EncryptedTokens) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();

        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO connections (
                user_id, access_token, refresh_token,
                expires_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                tokens.access_token,
                tokens.refresh_token,
                tokens.expires_at.to_rfc3339(),
                now,
            ],
        )?;

        Ok(())
    }

    /// Delete the connection for a user; returns whether a row existed.
    pub fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM connections WHERE user_id = ?1", params![user_id])?;

        Ok(rows_affected > 0)
    }
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{} '{}': {}", column, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_store() -> ConnectionStore {
        ConnectionStore::open(":memory:").expect("open test store")
    }

    fn test_tokens() -> EncryptedTokens {
        EncryptedTokens {
            access_token: "blob-access".to_string(),
            refresh_token: "blob-refresh".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = test_store();
        let tokens = test_tokens();

        store.upsert("user-1", &tokens).expect("upsert");

        let record = store.get("user-1").expect("get").expect("row exists");
        assert_eq!(record.user_id, "user-1");
        assert_eq!(record.access_token, "blob-access");
        assert_eq!(record.refresh_token, "blob-refresh");
        // RFC 3339 round-trip keeps sub-second precision
        assert_eq!(record.expires_at, tokens.expires_at);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = test_store();
        assert!(store.get("user-1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let store = test_store();
        store.upsert("user-1", &test_tokens()).unwrap();
        let first = store.get("user-1").unwrap().unwrap();

        let newer = EncryptedTokens {
            access_token: "blob-access-2".to_string(),
            refresh_token: "blob-refresh-2".to_string(),
            expires_at: Utc::now() + Duration::hours(2),
        };
        store.upsert("user-1", &newer).unwrap();

        let second = store.get("user-1").unwrap().unwrap();
        assert_eq!(second.access_token, "blob-access-2");
        assert_eq!(second.refresh_token, "blob-refresh-2");
        // Still one row, original creation time preserved
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn test_one_row_per_user() {
        let store = test_store();
        store.upsert("user-1", &test_tokens()).unwrap();
        store.upsert("user-1", &test_tokens()).unwrap();
        store.upsert("user-2", &test_tokens()).unwrap();

        // Deleting user-1 removes exactly one row
        assert!(store.delete("user-1").unwrap());
        assert!(store.get("user-1").unwrap().is_none());
        assert!(store.get("user-2").unwrap().is_some());
    }

    #[test]
    fn test_delete_idempotent() {
        let store = test_store();
        store.upsert("user-1", &test_tokens()).unwrap();

        assert!(store.delete("user-1").unwrap());
        assert!(!store.delete("user-1").unwrap());
    }

    #[test]
    fn test_on_disk_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("connections.db");

        {
            let store = ConnectionStore::open(&path).unwrap();
            store.upsert("user-1", &test_tokens()).unwrap();
        }

        // Reopen and read back
        let store = ConnectionStore::open(&path).unwrap();
        let record = store.get("user-1").unwrap().unwrap();
        assert_eq!(record.access_token, "blob-access");
    }
}
