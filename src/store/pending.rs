use super::{from_db_time, to_db_time, Store};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

/// An install notification waiting for its authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInstall {
    pub id: i64,
    pub location_id: String,
    pub received_at: DateTime<Utc>,
}

/// An authorization code that arrived before any install notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCode {
    pub id: i64,
    pub code: String,
    pub received_at: DateTime<Utc>,
}

/// Result of offering an authorization code to the pending-install mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeClaim {
    /// The code was handed to an exchange before and must not be used again.
    Redeemed,
    /// The code was paired with this install and is now marked redeemed.
    Install(PendingInstall),
    /// Nothing was waiting; the code is parked until an install arrives.
    Parked,
}

impl Store {
    pub fn insert_pending_install(
        &self,
        location_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        insert_install(&*self.conn()?, location_id, received_at)
    }

    /// Takes the most recent parked code received at or after `not_before`,
    /// or parks the install when there is none. One transaction, so an
    /// install and a code arriving together cannot both end up parked.
    ///
    /// A claimed code is recorded as redeemed before it is returned.
    pub fn claim_code_or_park_install(
        &self,
        location_id: &str,
        received_at: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<Option<PendingCode>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let claimed = match latest_code(&tx, not_before)? {
            Some(pending) => {
                mark_redeemed(&tx, &pending.code, received_at)?;
                Some(pending)
            }
            None => {
                insert_install(&tx, location_id, received_at)?;
                None
            }
        };

        tx.commit().context("Failed to commit claim")?;
        Ok(claimed)
    }

    /// Counterpart of [`Store::claim_code_or_park_install`] for the redirect.
    ///
    /// Takes the most recent pending install received at or after
    /// `not_before` (removing every pending row for that location), or parks
    /// the code. Codes already redeemed are neither paired nor parked.
    pub fn claim_install_or_park_code(
        &self,
        code: &str,
        received_at: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<CodeClaim> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        if is_redeemed(&tx, code)? {
            return Ok(CodeClaim::Redeemed);
        }

        let claim = match latest_install(&tx, not_before)? {
            Some(pending) => {
                tx.execute(
                    "DELETE FROM pending_installs WHERE location_id = ?1",
                    params![pending.location_id],
                )
                .context("Failed to claim pending install")?;
                mark_redeemed(&tx, code, received_at)?;
                CodeClaim::Install(pending)
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO pending_codes (code, received_at)
                    SELECT ?1, ?2
                    WHERE NOT EXISTS (SELECT 1 FROM pending_codes WHERE code = ?1)
                    "#,
                    params![code, to_db_time(received_at)],
                )
                .context("Failed to record pending code")?;
                CodeClaim::Parked
            }
        };

        tx.commit().context("Failed to commit claim")?;
        Ok(claim)
    }

    /// Records `code` as redeemed and drops any parked copy of it.
    /// Returns false when it had already been redeemed.
    pub fn redeem_code(&self, code: &str, redeemed_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let fresh = mark_redeemed(&tx, code, redeemed_at)?;
        tx.commit().context("Failed to commit redemption")?;
        Ok(fresh)
    }

    /// Drops every pending install for a location. Returns how many went.
    pub fn delete_pending_installs(&self, location_id: &str) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM pending_installs WHERE location_id = ?1",
                params![location_id],
            )
            .context("Failed to delete pending installs")
    }

    /// Removes pending installs and codes received before `older_than`.
    pub fn purge_pending(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let cutoff = to_db_time(older_than);
        let conn = self.conn()?;

        let installs = conn
            .execute(
                "DELETE FROM pending_installs WHERE received_at < ?1",
                params![cutoff],
            )
            .context("Failed to purge pending installs")?;
        let codes = conn
            .execute(
                "DELETE FROM pending_codes WHERE received_at < ?1",
                params![cutoff],
            )
            .context("Failed to purge pending codes")?;

        Ok(installs + codes)
    }

    /// Forgets redeemed-code fingerprints recorded before `older_than`.
    pub fn purge_redeemed_codes(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM redeemed_codes WHERE redeemed_at < ?1",
                params![to_db_time(older_than)],
            )
            .context("Failed to purge redeemed codes")
    }

    /// `(pending installs, pending codes)` currently stored.
    pub fn pending_counts(&self) -> Result<(usize, usize)> {
        let conn = self.conn()?;
        let installs: i64 = conn
            .query_row("SELECT COUNT(*) FROM pending_installs", [], |row| row.get(0))
            .context("Failed to count pending installs")?;
        let codes: i64 = conn
            .query_row("SELECT COUNT(*) FROM pending_codes", [], |row| row.get(0))
            .context("Failed to count pending codes")?;
        Ok((installs as usize, codes as usize))
    }
}

/// Codes are only kept as SHA-256 fingerprints once redeemed.
fn code_fingerprint(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn insert_install(conn: &Connection, location_id: &str, received_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_installs (location_id, received_at) VALUES (?1, ?2)",
        params![location_id, to_db_time(received_at)],
    )
    .context("Failed to record pending install")?;
    Ok(())
}

fn latest_install(conn: &Connection, not_before: DateTime<Utc>) -> Result<Option<PendingInstall>> {
    let row: Option<(i64, String, String)> = conn
        .query_row(
            r#"
            SELECT id, location_id, received_at
            FROM pending_installs
            WHERE received_at >= ?1
            ORDER BY received_at DESC, id DESC
            LIMIT 1
            "#,
            params![to_db_time(not_before)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .context("Failed to query pending installs")?;

    row.map(|(id, location_id, received_at)| {
        Ok(PendingInstall {
            id,
            location_id,
            received_at: from_db_time(&received_at)?,
        })
    })
    .transpose()
}

fn latest_code(conn: &Connection, not_before: DateTime<Utc>) -> Result<Option<PendingCode>> {
    let row: Option<(i64, String, String)> = conn
        .query_row(
            r#"
            SELECT id, code, received_at
            FROM pending_codes
            WHERE received_at >= ?1
            ORDER BY received_at DESC, id DESC
            LIMIT 1
            "#,
            params![to_db_time(not_before)],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .context("Failed to query pending codes")?;

    row.map(|(id, code, received_at)| {
        Ok(PendingCode {
            id,
            code,
            received_at: from_db_time(&received_at)?,
        })
    })
    .transpose()
}

fn is_redeemed(conn: &Connection, code: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM redeemed_codes WHERE code_hash = ?1)",
        params![code_fingerprint(code)],
        |row| row.get(0),
    )
    .context("Failed to look up redeemed code")
}

fn mark_redeemed(conn: &Connection, code: &str, redeemed_at: DateTime<Utc>) -> Result<bool> {
    conn.execute("DELETE FROM pending_codes WHERE code = ?1", params![code])
        .context("Failed to drop parked code")?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO redeemed_codes (code_hash, redeemed_at) VALUES (?1, ?2)",
            params![code_fingerprint(code), to_db_time(redeemed_at)],
        )
        .context("Failed to record redeemed code")?;
    Ok(inserted == 1)
}
