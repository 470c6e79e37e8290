//! AES-256-GCM encryption for stored OAuth tokens.
//!
//! The 256-bit key is derived once from a configured secret and salt with
//! Argon2id, so every process started with the same pair can read the same
//! rows. Each call to [`Vault::encrypt`] draws a fresh nonce; the output is
//! `hex(nonce):hex(ciphertext)`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::Deserialize;
use thiserror::Error;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

const SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),

    /// Authentication tag mismatch: wrong key, or the value was tampered with.
    #[error("decryption failed (wrong key or corrupted data)")]
    Decrypt,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
        }
    }
}

/// Symmetric vault holding the derived key.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    /// Derives the key with default cost parameters.
    ///
    /// Deliberately slow; build one `Vault` per process and share it.
    pub fn new(secret: &str, salt: &str) -> Result<Self, VaultError> {
        Self::with_params(secret, salt, KdfParams::default())
    }

    pub fn with_params(secret: &str, salt: &str, params: KdfParams) -> Result<Self, VaultError> {
        if secret.is_empty() {
            return Err(VaultError::KeyDerivation("secret must not be empty".to_string()));
        }

        let argon_params = Params::new(params.memory_kib, params.iterations, 1, Some(KEY_SIZE))
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut key = [0u8; KEY_SIZE];
        argon
            .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        Ok(format!("{}{}{}", hex::encode(nonce), SEPARATOR, hex::encode(ciphertext)))
    }

    /// Decrypts a value produced by [`Vault::encrypt`] under the same key.
    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        // Hex never contains the separator, so the first one splits nonce from payload.
        let (nonce_hex, payload_hex) = encoded
            .split_once(SEPARATOR)
            .ok_or(VaultError::Malformed("missing nonce separator"))?;

        let nonce_bytes =
            hex::decode(nonce_hex).map_err(|_| VaultError::Malformed("nonce is not valid hex"))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(VaultError::Malformed("nonce has the wrong length"));
        }
        let payload = hex::decode(payload_hex)
            .map_err(|_| VaultError::Malformed("ciphertext is not valid hex"))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), payload.as_ref())
            .map_err(|_| VaultError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Decrypt)
    }
}

#[cfg(test)]
pub(crate) fn test_vault() -> Vault {
    Vault::with_params(
        "test-secret",
        "test-salt-value",
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
        },
    )
    .expect("test vault")
}
