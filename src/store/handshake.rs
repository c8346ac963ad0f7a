//! Anti-forgery handshake states for the authorization redirect round-trip.
//!
//! Each state is a single-use random token bound to a 10-minute window.
//! Consumption is an atomic find-and-delete, so a token can never validate
//! twice; missing, expired, and replayed tokens are indistinguishable to the
//! caller.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// How long an issued state remains consumable (10 minutes)
pub const STATE_TTL_SECONDS: i64 = 600;

/// Random bytes per state token (hex-encoded for storage)
const STATE_TOKEN_BYTES: usize = 16;

/// Attempts to find an unused random value before failing closed
const ISSUE_ATTEMPTS: usize = 3;

/// Single-use, time-bounded handshake state store backed by SQLite.
pub struct HandshakeStore {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl HandshakeStore {
    /// Create or open the store.
    pub fn new<P: AsRef<Path>>(db_path: P, ttl_seconds: i64) -> Result<Self> {
        let conn = super::open_connection(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS handshake_states (
                state TEXT PRIMARY KEY,
                issued_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .context("failed to create handshake_states table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl: Duration::seconds(ttl_seconds),
        })
    }

    /// Issue a new single-use state token.
    ///
    /// Retries on a uniqueness collision with a fresh random value, then
    /// fails closed rather than looping.
    pub fn issue(&self) -> Result<String> {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> Result<String> {
        for _ in 0..ISSUE_ATTEMPTS {
            let mut bytes = [0u8; STATE_TOKEN_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let state = hex::encode(bytes);

            let inserted = self
                .conn
                .lock()
                .unwrap()
                .execute(
                    "INSERT INTO handshake_states (state, issued_at) VALUES (?1, ?2)",
                    params![state, now.timestamp()],
                );

            match inserted {
                Ok(_) => return Ok(state),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    continue;
                }
                Err(e) => return Err(e).context("failed to persist handshake state"),
            }
        }
        bail!("unable to generate a unique handshake state");
    }

    /// Atomically consume a state token.
    ///
    /// Returns true only if a matching, unexpired state existed. The delete
    /// and the expiry check are one statement, so consumption is exactly-once.
    pub fn consume(&self, state: &str) -> Result<bool> {
        self.consume_at(state, Utc::now())
    }

    pub fn consume_at(&self, state: &str, now: DateTime<Utc>) -> Result<bool> {
        let cutoff = (now - self.ttl).timestamp();
        let deleted = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM handshake_states WHERE state = ?1 AND issued_at > ?2",
                params![state, cutoff],
            )
            .context("failed to consume handshake state")?;
        Ok(deleted > 0)
    }

    /// Delete states that outlived the TTL without being consumed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = (now - self.ttl).timestamp();
        let deleted = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM handshake_states WHERE issued_at <= ?1",
                params![cutoff],
            )
            .context("failed to clean up handshake states")?;
        Ok(deleted)
    }

    /// Number of stored states, expired or not.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM handshake_states", [], |row| row.get(0))
            .context("failed to count handshake states")?;
        Ok(count)
    }
}

/// Background task that periodically sweeps expired states.
pub async fn run_state_cleanup(store: Arc<HandshakeStore>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        match store.cleanup_expired() {
            Ok(deleted) if deleted > 0 => {
                debug!(deleted, "handshake state cleanup complete");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "handshake state cleanup failed"),
        }
    }
}
