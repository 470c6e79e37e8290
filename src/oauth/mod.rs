//! Token lifecycle: initial code exchange and staleness-driven refresh.
//!
//! The platform issues access tokens that live roughly a day. Instead of
//! tracking `expires_in`, a stored pair is treated as stale once its
//! `updated_at` is older than the configured threshold, and refreshed on the
//! next use. Refreshes for one location are serialised by a per-location
//! guard, so concurrent callers never spend the same refresh token twice.

use crate::credentials::TokenPair;
use crate::error::{BridgeError, BridgeResult};
use crate::provider::ProviderClient;
use crate::store::Store;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a successful authorization-code exchange.
#[derive(Debug, Clone)]
pub struct Grant {
    /// Location the tokens belong to. The provider-reported id wins when it
    /// disagrees with the correlated one.
    pub location_id: String,
    pub tokens: TokenPair,
}

pub struct TokenManager {
    provider: ProviderClient,
    store: Arc<Store>,
    staleness: Duration,
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenManager {
    pub fn new(provider: ProviderClient, store: Arc<Store>, staleness: Duration) -> Self {
        Self {
            provider,
            store,
            staleness,
            guards: DashMap::new(),
        }
    }

    pub fn provider(&self) -> &ProviderClient {
        &self.provider
    }

    /// Redeems an authorization code. Codes are single-use; a rejection is
    /// returned as [`BridgeError::Exchange`] and never retried.
    pub async fn exchange_code(&self, location_id: &str, code: &str) -> BridgeResult<Grant> {
        debug!(location_id = %location_id, "Exchanging authorization code");

        let response = self
            .provider
            .exchange_code(code)
            .await
            .map_err(BridgeError::Exchange)?;

        let reported = response.location_id.clone();
        let tokens = response
            .into_pair(None)
            .ok_or(BridgeError::MissingRefreshToken)?;

        let location_id = match reported {
            Some(reported) if !reported.is_empty() && reported != location_id => {
                warn!(
                    correlated = %location_id,
                    reported = %reported,
                    "Provider issued tokens for a different location than correlated"
                );
                reported
            }
            _ => location_id.to_string(),
        };

        Ok(Grant {
            location_id,
            tokens,
        })
    }

    /// Returns a usable access token for the location, refreshing first when
    /// the stored pair is stale.
    ///
    /// The location's guard is held from load to persist, so a caller queued
    /// behind a refresh reads the fresh record instead of refreshing again.
    pub async fn ensure_valid_access_token(&self, location_id: &str) -> BridgeResult<String> {
        let guard = self.guard_for(location_id);
        let _held = guard.lock().await;

        let record = self
            .store
            .get(location_id)?
            .ok_or_else(|| BridgeError::NotFound(location_id.to_string()))?;
        let tokens = self.store.decrypt_tokens(&record)?;

        let age = Utc::now() - record.updated_at;
        if age < self.staleness {
            debug!(location_id = %location_id, age_secs = age.num_seconds(), "Access token still fresh");
            return Ok(tokens.access_token);
        }

        info!(location_id = %location_id, age_secs = age.num_seconds(), "Refreshing access token");

        let response = self
            .provider
            .refresh_token(&tokens.refresh_token)
            .await
            .map_err(BridgeError::Refresh)?;
        let fresh = response
            .into_pair(Some(&tokens.refresh_token))
            .ok_or(BridgeError::MissingRefreshToken)?;

        // Uninstalled while the refresh was in flight
        if !self.store.replace_tokens(location_id, &fresh)? {
            return Err(BridgeError::NotFound(location_id.to_string()));
        }

        info!(location_id = %location_id, "Access token refreshed");
        Ok(fresh.access_token)
    }

    /// Drops the location's refresh guard. Called on uninstall.
    pub fn forget(&self, location_id: &str) {
        self.guards.remove(location_id);
    }

    fn guard_for(&self, location_id: &str) -> Arc<Mutex<()>> {
        self.guards
            .entry(location_id.to_string())
            .or_default()
            .clone()
    }
}
