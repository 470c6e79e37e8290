//! HTTP surface: OAuth redirect, lifecycle webhook, field submission, admin.

pub mod admin;
pub mod callback;
mod error;
pub mod fields;
pub mod webhook;

pub use admin::create_admin_router;
pub use callback::create_callback_router;
pub use error::AppError;
pub use fields::create_fields_router;
pub use webhook::create_webhook_router;

use crate::config::BridgeConfig;
use crate::credentials::Vault;
use crate::install::{InstallCorrelator, MenuSync};
use crate::notify::Notifier;
use crate::oauth::TokenManager;
use crate::provider::ProviderClient;
use crate::store::Store;
use crate::sync::FieldSyncDispatcher;
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared handles for every router.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tokens: Arc<TokenManager>,
    pub installs: Arc<InstallCorrelator>,
    pub dispatcher: Arc<FieldSyncDispatcher>,
    /// Where the browser lands after a completed install
    pub confirmation_url: String,
    /// Bearer token for /api/admin routes. None = admin routes disabled.
    pub admin_token: Option<String>,
}

impl AppState {
    /// Derives the vault key, opens the store and wires every component.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let vault = Vault::with_params(&config.vault.secret, &config.vault.salt, config.vault.kdf)
            .context("Failed to derive vault key")?;
        let store = Arc::new(
            Store::open(&config.store.db_path, Arc::new(vault))
                .with_context(|| format!("Failed to open store at {}", config.store.db_path))?,
        );

        let provider =
            ProviderClient::new(&config.provider).context("Failed to build provider client")?;
        let tokens = Arc::new(TokenManager::new(
            provider.clone(),
            Arc::clone(&store),
            chrono::Duration::hours(config.tokens.staleness_hours),
        ));
        let notifier = Notifier::new(provider.http_client().clone(), &config.notify);
        let menu = MenuSync::from_config(provider.clone(), &config.menu);
        let installs = Arc::new(InstallCorrelator::new(
            Arc::clone(&tokens),
            Arc::clone(&store),
            notifier,
            menu,
            chrono::Duration::seconds(config.install.correlation_window_seconds),
        ));
        let dispatcher = Arc::new(FieldSyncDispatcher::new(
            provider,
            config.sync.write_concurrency,
        ));

        Ok(Self {
            store,
            tokens,
            installs,
            dispatcher,
            confirmation_url: config.install.confirmation_url.clone(),
            admin_token: config.admin.token.clone().filter(|t| !t.is_empty()),
        })
    }
}

/// Every route the service exposes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_callback_router(state.clone()))
        .merge(create_webhook_router(state.clone()))
        .merge(create_fields_router(state.clone()))
        .merge(create_admin_router(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
