//! OAuth token pairs and the vault that encrypts them at rest.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Store (accounts table)             │
//! │  - encrypts on write                     │
//! │  - decrypt_tokens() on read              │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Vault                              │
//! │  - Argon2id key derivation (once)        │
//! │  - AES-256-GCM, fresh nonce per value    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use fieldsync::credentials::{TokenPair, Vault};
//!
//! # fn main() -> anyhow::Result<()> {
//! let vault = Vault::new("encrypt-secret", "encrypt-salt")?;
//! let stored = vault.encrypt("access-token")?;
//! assert_eq!(vault.decrypt(&stored)?, "access-token");
//!
//! let pair = TokenPair {
//!     access_token: "access-token".to_string(),
//!     refresh_token: "refresh-token".to_string(),
//! };
//! # let _ = pair;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

mod vault;

pub use vault::{KdfParams, Vault, VaultError};

#[cfg(test)]
pub(crate) use vault::test_vault;

/// Access and refresh token returned by one token exchange.
///
/// The two are always written and replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}
