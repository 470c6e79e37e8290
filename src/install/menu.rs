use crate::config::MenuConfig;
use crate::provider::{CustomMenu, ProviderClient};
use crate::store::Store;

/// Pushes the installed-location list to the agency's custom menu.
#[derive(Clone)]
pub struct MenuSync {
    provider: ProviderClient,
    menu_id: String,
    api_token: String,
    title: String,
    url: String,
}

impl MenuSync {
    /// `None` unless both a menu id and an agency token are configured.
    pub fn from_config(provider: ProviderClient, config: &MenuConfig) -> Option<Self> {
        let menu_id = config.menu_id.clone().filter(|s| !s.is_empty())?;
        let api_token = config.api_token.clone().filter(|s| !s.is_empty())?;
        Some(Self {
            provider,
            menu_id,
            api_token,
            title: config.title.clone(),
            url: config.url.clone(),
        })
    }

    /// Sends the full list. Failures are logged only; the menu catches up on
    /// the next install or uninstall.
    pub async fn push(&self, store: &Store) {
        let locations = match store.list_menu_installs() {
            Ok(locations) => locations,
            Err(e) => {
                tracing::warn!("Failed to read menu installs: {:#}", e);
                return;
            }
        };

        let count = locations.len();
        let menu = CustomMenu::for_locations(&self.title, &self.url, locations);
        match self
            .provider
            .update_custom_menu(&self.menu_id, &self.api_token, &menu)
            .await
        {
            Ok(()) => tracing::debug!(locations = count, "Custom menu updated"),
            Err(e) => tracing::warn!("Custom menu update failed: {}", e),
        }
    }
}
