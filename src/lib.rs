// OAuth install bridge and custom-value sync relay

// HTTP routers and shared state
pub mod api;

// Configuration (TOML + environment)
pub mod config;

// Token pairs and at-rest encryption
pub mod credentials;

pub mod error;

// Install/code correlation and lifecycle handling
pub mod install;

// Field-name resolution against the custom-value catalog
pub mod mapping;

// Outbound lifecycle notifications
pub mod notify;

// Token exchange and refresh
pub mod oauth;

// Platform API client
pub mod provider;

// SQLite account store
pub mod store;

// Field update relay
pub mod sync;
