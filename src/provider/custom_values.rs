use super::{send, ProviderClient, ProviderError};
use serde::{Deserialize, Serialize};

/// One custom value slot on a location.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomValue {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Templated key, e.g. `{{ custom_values.agent_name }}`.
    #[serde(default, rename = "fieldKey")]
    pub field_key: Option<String>,
}

#[derive(Deserialize)]
struct CustomValuesResponse {
    #[serde(default, rename = "customValues")]
    custom_values: Vec<CustomValue>,
}

#[derive(Serialize)]
struct CustomValueUpdate<'a> {
    name: &'a str,
    value: &'a str,
}

impl ProviderClient {
    /// GET /locations/{id}/customValues
    pub async fn list_custom_values(
        &self,
        location_id: &str,
        access_token: &str,
    ) -> Result<Vec<CustomValue>, ProviderError> {
        const ENDPOINT: &str = "custom value listing";

        let url = self.url(&format!(
            "/locations/{}/customValues",
            urlencoding::encode(location_id)
        ));
        let request = self.authorized(self.http_client.get(&url), access_token);
        let response = send(ENDPOINT, request).await?;

        let body: CustomValuesResponse =
            response
                .json()
                .await
                .map_err(|source| ProviderError::Decode {
                    endpoint: ENDPOINT,
                    source,
                })?;
        Ok(body.custom_values)
    }

    /// PUT /locations/{id}/customValues/{fieldId} with the display name and new value.
    pub async fn update_custom_value(
        &self,
        location_id: &str,
        access_token: &str,
        field_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!(
            "/locations/{}/customValues/{}",
            urlencoding::encode(location_id),
            urlencoding::encode(field_id)
        ));
        let request = self
            .authorized(self.http_client.put(&url), access_token)
            .json(&CustomValueUpdate { name, value });

        send("custom value update", request).await?;
        Ok(())
    }
}
