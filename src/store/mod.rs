//! Durable storage for handshake states and token records.
//!
//! Both record kinds live in one SQLite database file. Each store owns its
//! own connection behind a `Mutex`; SQLite serializes writers across the
//! shared file.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

mod handshake;
mod records;

pub use handshake::{run_state_cleanup, HandshakeStore, STATE_TTL_SECONDS};
pub use records::{TokenRecord, TokenRecordStore};

/// Open a connection to the shared database file.
///
/// A busy timeout is set because the handshake and record stores hold
/// separate connections to the same file.
fn open_connection<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    Ok(conn)
}
