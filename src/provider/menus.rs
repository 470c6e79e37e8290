use super::{send, ProviderClient, ProviderError};
use serde::Serialize;

/// Icon shown next to the custom menu entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuIcon {
    pub name: String,
    pub font_family: String,
}

/// Body of the custom-menu update. `locations` is the complete list of
/// installed location ids; the provider replaces its list with it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMenu {
    pub title: String,
    pub url: String,
    pub icon: MenuIcon,
    pub show_on_company: bool,
    pub show_on_location: bool,
    pub show_to_all_locations: bool,
    pub open_mode: String,
    pub user_role: String,
    pub allow_camera: bool,
    pub allow_microphone: bool,
    pub locations: Vec<String>,
}

impl CustomMenu {
    pub fn for_locations(title: &str, url: &str, locations: Vec<String>) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            icon: MenuIcon {
                name: "yin-yang".to_string(),
                font_family: "fab".to_string(),
            },
            show_on_company: true,
            show_on_location: true,
            show_to_all_locations: false,
            open_mode: "iframe".to_string(),
            user_role: "all".to_string(),
            allow_camera: false,
            allow_microphone: false,
            locations,
        }
    }
}

impl ProviderClient {
    /// PUT /custom-menus/{menuId}, authenticated with the agency-level token.
    pub async fn update_custom_menu(
        &self,
        menu_id: &str,
        api_token: &str,
        menu: &CustomMenu,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("/custom-menus/{}", urlencoding::encode(menu_id)));
        let request = self
            .authorized(self.http_client.put(&url), api_token)
            .json(menu);

        send("custom menu update", request).await?;
        Ok(())
    }
}
