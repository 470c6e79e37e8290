//! SQLite persistence for location accounts and install bookkeeping.
//!
//! # Schema
//! ```sql
//! CREATE TABLE accounts (
//!     location_id             TEXT PRIMARY KEY,
//!     access_token_encrypted  TEXT NOT NULL,   -- vault ciphertext
//!     refresh_token_encrypted TEXT NOT NULL,   -- vault ciphertext
//!     field_mappings          TEXT NOT NULL,   -- JSON: templated key -> field id
//!     field_labels            TEXT NOT NULL,   -- JSON: templated key -> display name
//!     created_at              TEXT NOT NULL,   -- RFC 3339, insert only
//!     updated_at              TEXT NOT NULL    -- RFC 3339, credential writes only
//! );
//! CREATE TABLE pending_installs (id INTEGER PRIMARY KEY, location_id TEXT, received_at TEXT);
//! CREATE TABLE pending_codes    (id INTEGER PRIMARY KEY, code TEXT, received_at TEXT);
//! CREATE TABLE redeemed_codes   (code_hash TEXT PRIMARY KEY, redeemed_at TEXT); -- SHA-256 hex
//! CREATE TABLE menu_installs    (location_id TEXT PRIMARY KEY, updated_at TEXT);
//! ```
//!
//! The connection is opened once per process and shared behind a `Mutex`.
//! Every multi-statement operation runs under that lock, so pending rows are
//! handed out at most once.

mod accounts;
mod menu;
mod pending;

pub use accounts::AccountRecord;
pub use pending::{CodeClaim, PendingCode, PendingInstall};

use crate::credentials::Vault;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Store {
    conn: Mutex<Connection>,
    vault: Arc<Vault>,
}

impl Store {
    /// Opens (or creates) the database and ensures every table exists.
    ///
    /// Pass `":memory:"` for a throwaway store.
    pub fn open<P: AsRef<Path>>(db_path: P, vault: Arc<Vault>) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                location_id             TEXT PRIMARY KEY,
                access_token_encrypted  TEXT NOT NULL,
                refresh_token_encrypted TEXT NOT NULL,
                field_mappings          TEXT NOT NULL,
                field_labels            TEXT NOT NULL DEFAULT '{}',
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pending_installs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id TEXT NOT NULL,
                received_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_installs_received
                ON pending_installs(received_at);
            CREATE TABLE IF NOT EXISTS pending_codes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                code        TEXT NOT NULL,
                received_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS redeemed_codes (
                code_hash   TEXT PRIMARY KEY,
                redeemed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS menu_installs (
                location_id TEXT PRIMARY KEY,
                updated_at  TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            vault,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection mutex poisoned"))
    }
}

/// Timestamps are stored at microsecond precision in a fixed-width UTC form,
/// so string comparison in SQL matches chronological order.
fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp '{raw}'"))
}

/// Current time truncated to what the database keeps.
fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
pub(crate) fn test_store() -> Store {
    Store::open(":memory:", Arc::new(crate::credentials::test_vault())).expect("test store")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_roundtrip_and_ordering() {
        let earlier = db_now();
        let later = earlier + chrono::Duration::microseconds(1);

        assert_eq!(from_db_time(&to_db_time(earlier)).unwrap(), earlier);
        assert!(to_db_time(earlier) < to_db_time(later));
    }

    #[test]
    fn test_reopen_file_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let vault = Arc::new(crate::credentials::test_vault());

        drop(Store::open(&path, Arc::clone(&vault)).unwrap());
        let store = Store::open(&path, vault).unwrap();
        assert!(store.list_locations().unwrap().is_empty());
    }
}
