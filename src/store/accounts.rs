use super::{db_now, from_db_time, to_db_time, Store};
use crate::credentials::{TokenPair, VaultError};
use crate::mapping::FieldCatalog;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// A persisted location account. Token columns hold vault ciphertext; use
/// [`Store::decrypt_tokens`] to read them.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub location_id: String,
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: String,
    pub field_catalog: FieldCatalog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type RawAccount = (String, String, String, String, String, String, String);

impl Store {
    /// Creates the account or overwrites tokens and catalog of an existing one.
    ///
    /// `created_at` is kept on overwrite.
    pub fn save_install(
        &self,
        location_id: &str,
        tokens: &TokenPair,
        catalog: &FieldCatalog,
    ) -> Result<()> {
        let (access, refresh) = self.encrypt_pair(tokens)?;
        let mappings =
            serde_json::to_string(&catalog.mappings).context("Failed to encode field mappings")?;
        let labels =
            serde_json::to_string(&catalog.labels).context("Failed to encode field labels")?;

        let conn = self.conn()?;
        let stamp = to_db_time(next_update_time(&conn, location_id)?);

        conn.execute(
            r#"
            INSERT INTO accounts (
                location_id, access_token_encrypted, refresh_token_encrypted,
                field_mappings, field_labels, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(location_id) DO UPDATE SET
                access_token_encrypted = excluded.access_token_encrypted,
                refresh_token_encrypted = excluded.refresh_token_encrypted,
                field_mappings = excluded.field_mappings,
                field_labels = excluded.field_labels,
                updated_at = excluded.updated_at
            "#,
            params![location_id, access, refresh, mappings, labels, stamp],
        )
        .context("Failed to save account")?;

        Ok(())
    }

    /// Overwrites both tokens and bumps `updated_at`. Returns `false` when
    /// the location has no account.
    pub fn replace_tokens(&self, location_id: &str, tokens: &TokenPair) -> Result<bool> {
        let (access, refresh) = self.encrypt_pair(tokens)?;

        let conn = self.conn()?;
        let stamp = to_db_time(next_update_time(&conn, location_id)?);

        let rows = conn
            .execute(
                r#"
                UPDATE accounts
                SET access_token_encrypted = ?2, refresh_token_encrypted = ?3, updated_at = ?4
                WHERE location_id = ?1
                "#,
                params![location_id, access, refresh, stamp],
            )
            .context("Failed to update tokens")?;

        Ok(rows > 0)
    }

    /// Replaces the field catalog only. Token freshness is measured from
    /// `updated_at`, so it is left alone here.
    pub fn replace_mappings(&self, location_id: &str, catalog: &FieldCatalog) -> Result<bool> {
        let mappings =
            serde_json::to_string(&catalog.mappings).context("Failed to encode field mappings")?;
        let labels =
            serde_json::to_string(&catalog.labels).context("Failed to encode field labels")?;

        let rows = self
            .conn()?
            .execute(
                "UPDATE accounts SET field_mappings = ?2, field_labels = ?3 WHERE location_id = ?1",
                params![location_id, mappings, labels],
            )
            .context("Failed to update field mappings")?;

        Ok(rows > 0)
    }

    pub fn get(&self, location_id: &str) -> Result<Option<AccountRecord>> {
        let raw: Option<RawAccount> = self
            .conn()?
            .query_row(
                r#"
                SELECT location_id, access_token_encrypted, refresh_token_encrypted,
                       field_mappings, field_labels, created_at, updated_at
                FROM accounts
                WHERE location_id = ?1
                "#,
                params![location_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load account")?;

        raw.map(decode_account).transpose()
    }

    /// Decrypts the stored token pair of a record.
    pub fn decrypt_tokens(&self, record: &AccountRecord) -> Result<TokenPair, VaultError> {
        Ok(TokenPair {
            access_token: self.vault.decrypt(&record.access_token_encrypted)?,
            refresh_token: self.vault.decrypt(&record.refresh_token_encrypted)?,
        })
    }

    /// Removes the account. Returns `false` if there was none.
    pub fn delete(&self, location_id: &str) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM accounts WHERE location_id = ?1",
                params![location_id],
            )
            .context("Failed to delete account")?;

        Ok(rows > 0)
    }

    pub fn list_locations(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT location_id FROM accounts ORDER BY location_id")
            .context("Failed to prepare query")?;

        let locations = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query accounts")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read account rows")?;

        Ok(locations)
    }

    fn encrypt_pair(&self, tokens: &TokenPair) -> Result<(String, String)> {
        let access = self
            .vault
            .encrypt(&tokens.access_token)
            .context("Failed to encrypt access token")?;
        let refresh = self
            .vault
            .encrypt(&tokens.refresh_token)
            .context("Failed to encrypt refresh token")?;
        Ok((access, refresh))
    }
}

/// Next `updated_at` for a location: now, or one microsecond past the stored
/// value when the clock has not moved beyond it.
fn next_update_time(conn: &Connection, location_id: &str) -> Result<DateTime<Utc>> {
    let previous: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM accounts WHERE location_id = ?1",
            params![location_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read previous update time")?;

    let now = db_now();
    match previous {
        Some(raw) => {
            let previous = from_db_time(&raw)?;
            if previous >= now {
                Ok(previous + Duration::microseconds(1))
            } else {
                Ok(now)
            }
        }
        None => Ok(now),
    }
}

fn decode_account(raw: RawAccount) -> Result<AccountRecord> {
    let (location_id, access, refresh, mappings, labels, created_at, updated_at) = raw;

    let mappings: BTreeMap<String, String> = serde_json::from_str(&mappings)
        .with_context(|| format!("Corrupt field mappings for {location_id}"))?;
    let labels: BTreeMap<String, String> = serde_json::from_str(&labels)
        .with_context(|| format!("Corrupt field labels for {location_id}"))?;

    Ok(AccountRecord {
        access_token_encrypted: access,
        refresh_token_encrypted: refresh,
        field_catalog: FieldCatalog { mappings, labels },
        created_at: from_db_time(&created_at)?,
        updated_at: from_db_time(&updated_at)?,
        location_id,
    })
}
