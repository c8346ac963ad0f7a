//! Durable per-subject token records.
//!
//! One row per subject, holding the encrypted access and refresh tokens as
//! ciphertext envelopes plus expiry metadata. Creation and update share one
//! upsert path keyed by subject id; the whole record is replaced atomically,
//! so concurrent writers cannot interleave partial field writes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// A stored token record. Token fields are ciphertext envelopes; the store
/// never sees plaintext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Token record storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE token_records (
///     subject_id TEXT PRIMARY KEY,
///     access_token TEXT NOT NULL,   -- ciphertext envelope
///     refresh_token TEXT NOT NULL,  -- ciphertext envelope
///     token_type TEXT NOT NULL,
///     scope TEXT,
///     expires_at TEXT NOT NULL,     -- RFC 3339
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
pub struct TokenRecordStore {
    conn: Mutex<Connection>,
}

impl TokenRecordStore {
    /// Create or open the store.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = super::open_connection(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS token_records (
                subject_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_type TEXT NOT NULL,
                scope TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("failed to create token_records table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Retrieve the record for a subject.
    pub fn get(&self, subject_id: &str) -> Result<Option<TokenRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                r#"
                SELECT access_token, refresh_token, token_type, scope, expires_at
                FROM token_records
                WHERE subject_id = ?1
                "#,
                params![subject_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("failed to query token record")?;

        let Some((access_token, refresh_token, token_type, scope, expires_at)) = record else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .context("failed to parse expires_at timestamp")?;

        Ok(Some(TokenRecord {
            subject_id: subject_id.to_string(),
            access_token,
            refresh_token,
            token_type,
            scope,
            expires_at,
        }))
    }

    /// Insert or replace the record for a subject.
    ///
    /// One atomic statement; either the whole new record is visible or the
    /// whole old one still is.
    pub fn upsert(&self, record: &TokenRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO token_records (
                    subject_id, access_token, refresh_token,
                    token_type, scope, expires_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(subject_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_type = excluded.token_type,
                    scope = excluded.scope,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.subject_id,
                    record.access_token,
                    record.refresh_token,
                    record.token_type,
                    record.scope,
                    record.expires_at.to_rfc3339(),
                    now,
                    now,
                ],
            )
            .context("failed to store token record")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_store() -> TokenRecordStore {
        TokenRecordStore::new(":memory:").expect("failed to create test store")
    }

    fn test_record(subject: &str) -> TokenRecord {
        TokenRecord {
            subject_id: subject.to_string(),
            access_token: "nonce.tag.access-ct".to_string(),
            refresh_token: "nonce.tag.refresh-ct".to_string(),
            token_type: "Bearer".to_string(),
            scope: Some("user-read-email".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = test_store();
        let record = test_record("user-1");

        store.upsert(&record).unwrap();

        let loaded = store.get("user-1").unwrap().unwrap();
        assert_eq!(loaded.access_token, record.access_token);
        assert_eq!(loaded.refresh_token, record.refresh_token);
        assert_eq!(loaded.token_type, "Bearer");
        assert_eq!(loaded.scope, record.scope);
        // RFC 3339 round-trip keeps sub-second precision.
        assert_eq!(loaded.expires_at, record.expires_at);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = test_store();
        assert!(store.get("user-1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_whole_record() {
        let store = test_store();
        store.upsert(&test_record("user-1")).unwrap();

        let replacement = TokenRecord {
            subject_id: "user-1".to_string(),
            access_token: "n2.t2.new-access".to_string(),
            refresh_token: "n2.t2.new-refresh".to_string(),
            token_type: "Bearer".to_string(),
            scope: None,
            expires_at: Utc::now() + Duration::hours(2),
        };
        store.upsert(&replacement).unwrap();

        let loaded = store.get("user-1").unwrap().unwrap();
        assert_eq!(loaded.access_token, "n2.t2.new-access");
        assert_eq!(loaded.refresh_token, "n2.t2.new-refresh");
        assert_eq!(loaded.scope, None);
    }

    #[test]
    fn test_stores_share_one_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trove.db");

        let records = TokenRecordStore::new(&path).unwrap();
        let handshake = crate::store::HandshakeStore::new(&path, 600).unwrap();

        records.upsert(&test_record("user-1")).unwrap();
        let state = handshake.issue().unwrap();
        assert!(handshake.consume(&state).unwrap());

        // Reopening sees the persisted record.
        drop(records);
        let reopened = TokenRecordStore::new(&path).unwrap();
        assert!(reopened.get("user-1").unwrap().is_some());
    }

    #[test]
    fn test_records_are_per_subject() {
        let store = test_store();
        store.upsert(&test_record("user-1")).unwrap();
        store.upsert(&test_record("user-2")).unwrap();

        assert!(store.get("user-1").unwrap().is_some());
        assert!(store.get("user-2").unwrap().is_some());
        assert!(store.get("user-3").unwrap().is_none());
    }
}
