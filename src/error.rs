//! Error taxonomy shared by the token, install and sync paths.
//!
//! Handlers translate these into HTTP statuses in `api::error`; nothing here
//! knows about HTTP.

use crate::credentials::VaultError;
use crate::provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Request is missing a required field. Caller must fix and resend.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No account record for the location.
    #[error("location '{0}' is not installed")]
    NotFound(String),

    /// Provider rejected the authorization code. Codes are single-use, so this is final.
    #[error("authorization code exchange failed: {0}")]
    Exchange(#[source] ProviderError),

    /// Provider rejected the refresh token. The location has to reinstall.
    #[error("access token refresh failed: {0}")]
    Refresh(#[source] ProviderError),

    /// Token endpoint answered 2xx but left out the refresh token on a first grant.
    #[error("token response carried no refresh token")]
    MissingRefreshToken,

    /// Stored ciphertext could not be decrypted (wrong key or corrupted row).
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Any other provider call (catalog listing, menu push).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
