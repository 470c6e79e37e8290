use crate::credentials::KdfParams;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;

/// Complete service configuration.
///
/// Loaded from an optional TOML file, then overridden from `FIELDSYNC_*`
/// environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub menu: MenuConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// OAuth client registration and API endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_user_type")]
    pub user_type: String,
    /// Whole-request timeout for every provider call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://services.leadconnectorhq.com".to_string()
}

fn default_api_version() -> String {
    "2021-07-28".to_string()
}

fn default_user_type() -> String {
    "Company".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            api_version: default_api_version(),
            user_type: default_user_type(),
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "fieldsync.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Age after which a stored access token is refreshed before use.
    /// Below the provider's 24h lifetime so the refresh happens first.
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: i64,
}

fn default_staleness_hours() -> i64 {
    22
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            staleness_hours: default_staleness_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallConfig {
    /// How long a pending install or parked code stays claimable
    #[serde(default = "default_correlation_window")]
    pub correlation_window_seconds: i64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Where the browser lands after a completed install
    #[serde(default = "default_confirmation_url")]
    pub confirmation_url: String,
}

fn default_correlation_window() -> i64 {
    600
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_confirmation_url() -> String {
    "https://app.gohighlevel.com/".to_string()
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            correlation_window_seconds: default_correlation_window(),
            cleanup_interval_seconds: default_cleanup_interval(),
            confirmation_url: default_confirmation_url(),
        }
    }
}

/// Downstream webhook for install/uninstall notifications.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Include the freshly issued token pair in install notifications
    #[serde(default)]
    pub forward_tokens: bool,
}

/// Custom menu listing every installed location. Disabled unless both
/// `menu_id` and `api_token` are set.
#[derive(Debug, Clone, Deserialize)]
pub struct MenuConfig {
    #[serde(default)]
    pub menu_id: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_menu_title")]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

fn default_menu_title() -> String {
    "Custom Menu".to_string()
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            menu_id: None,
            api_token: None,
            title: default_menu_title(),
            url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum field writes in flight per request
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
}

fn default_write_concurrency() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write_concurrency: default_write_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for /api/admin routes. None = admin routes disabled.
    #[serde(default)]
    pub token: Option<String>,
}

impl BridgeConfig {
    /// Loads `FIELDSYNC_CONFIG` (if set) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FIELDSYNC_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from environment variables.
    ///
    /// Unparseable numeric values are ignored and the previous value kept.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set_string = |target: &mut String, name: &str| {
            if let Some(v) = lookup(name) {
                *target = v;
            }
        };

        set_string(&mut self.provider.base_url, "FIELDSYNC_PROVIDER_BASE_URL");
        set_string(&mut self.provider.client_id, "FIELDSYNC_CLIENT_ID");
        set_string(&mut self.provider.client_secret, "FIELDSYNC_CLIENT_SECRET");
        set_string(&mut self.provider.redirect_uri, "FIELDSYNC_REDIRECT_URI");
        set_string(&mut self.vault.secret, "FIELDSYNC_ENCRYPT_SECRET");
        set_string(&mut self.vault.salt, "FIELDSYNC_ENCRYPT_SALT");
        set_string(&mut self.store.db_path, "FIELDSYNC_DB_PATH");
        set_string(
            &mut self.install.confirmation_url,
            "FIELDSYNC_CONFIRMATION_URL",
        );

        if let Some(v) = lookup("FIELDSYNC_BIND_ADDR") {
            if let Ok(addr) = v.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
            }
        }
        if let Some(v) = lookup("FIELDSYNC_STALENESS_HOURS") {
            if let Ok(n) = v.parse::<i64>() {
                self.tokens.staleness_hours = n;
            }
        }
        if let Some(v) = lookup("FIELDSYNC_WEBHOOK_URL") {
            self.notify.webhook_url = Some(v);
        }
        if let Some(v) = lookup("FIELDSYNC_MENU_ID") {
            self.menu.menu_id = Some(v);
        }
        if let Some(v) = lookup("FIELDSYNC_API_TOKEN") {
            self.menu.api_token = Some(v);
        }
        if let Some(v) = lookup("FIELDSYNC_ADMIN_TOKEN") {
            self.admin.token = Some(v);
        }
    }

    /// Fails when a value the service cannot run without is missing.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("provider.client_id", &self.provider.client_id),
            ("provider.client_secret", &self.provider.client_secret),
            ("vault.secret", &self.vault.secret),
            ("vault.salt", &self.vault.salt),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            bail!("missing required configuration: {}", missing.join(", "));
        }
        if self.tokens.staleness_hours <= 0 {
            bail!("tokens.staleness_hours must be positive");
        }
        if self.sync.write_concurrency == 0 {
            bail!("sync.write_concurrency must be at least 1");
        }
        if self.install.correlation_window_seconds <= 0 {
            bail!("install.correlation_window_seconds must be positive");
        }
        if self.install.cleanup_interval_seconds == 0 {
            bail!("install.cleanup_interval_seconds must be at least 1");
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<BridgeConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {path}"))?;
    let config: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {path}"))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.tokens.staleness_hours, 22);
        assert_eq!(config.install.correlation_window_seconds, 600);
        assert_eq!(config.provider.api_version, "2021-07-28");
        assert_eq!(config.provider.timeout_seconds, 15);
        assert_eq!(config.sync.write_concurrency, 4);
        assert!(config.admin.token.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:8080"

            [provider]
            client_id = "cid"
            client_secret = "secret"
            redirect_uri = "https://bridge.example.com/callback"

            [vault]
            secret = "vault-secret"
            salt = "vault-salt"

            [vault.kdf]
            memory_kib = 4096
            iterations = 3

            [tokens]
            staleness_hours = 12

            [notify]
            webhook_url = "https://hooks.example.com/x"
            forward_tokens = true
        "#;

        let config: BridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.provider.client_id, "cid");
        assert_eq!(config.vault.kdf.memory_kib, 4096);
        assert_eq!(config.tokens.staleness_hours, 12);
        assert!(config.notify.forward_tokens);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [sync]
            write_concurrency = 2
        "#;

        let config: BridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sync.write_concurrency, 2);
        assert_eq!(config.tokens.staleness_hours, 22); // Default
        assert_eq!(config.store.db_path, "fieldsync.db"); // Default
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FIELDSYNC_CLIENT_ID", "env-client"),
            ("FIELDSYNC_CLIENT_SECRET", "env-secret"),
            ("FIELDSYNC_ENCRYPT_SECRET", "s"),
            ("FIELDSYNC_ENCRYPT_SALT", "salt-salt"),
            ("FIELDSYNC_STALENESS_HOURS", "not-a-number"),
            ("FIELDSYNC_ADMIN_TOKEN", "admin"),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.provider.client_id, "env-client");
        assert_eq!(config.tokens.staleness_hours, 22); // unparseable → unchanged
        assert_eq!(config.admin.token.as_deref(), Some("admin"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let err = BridgeConfig::default().validate().unwrap_err().to_string();
        assert!(err.contains("provider.client_id"));
        assert!(err.contains("vault.salt"));
    }

    #[test]
    fn test_validate_rejects_degenerate_install_timing() {
        let mut config = BridgeConfig::default();
        config.provider.client_id = "cid".to_string();
        config.provider.client_secret = "secret".to_string();
        config.vault.secret = "s".to_string();
        config.vault.salt = "salt-salt".to_string();
        assert!(config.validate().is_ok());

        config.install.cleanup_interval_seconds = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("cleanup_interval_seconds"));

        config.install.cleanup_interval_seconds = 60;
        config.install.correlation_window_seconds = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("correlation_window_seconds"));

        config.install.correlation_window_seconds = -5;
        assert!(config.validate().is_err());
    }
}
