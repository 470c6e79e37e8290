use super::{camel_to_snake, template_key, FieldCatalog};
use crate::provider::{CustomValue, ProviderClient, ProviderError};

/// Fetches every custom value defined on the location and builds its catalog.
pub async fn build_mappings(
    provider: &ProviderClient,
    location_id: &str,
    access_token: &str,
) -> Result<FieldCatalog, ProviderError> {
    let values = provider
        .list_custom_values(location_id, access_token)
        .await?;

    let catalog = catalog_from_values(values);
    tracing::debug!(
        location_id = %location_id,
        fields = catalog.mappings.len(),
        "Built field catalog"
    );
    Ok(catalog)
}

/// Keys each value by its `fieldKey`. Values without one get the template
/// form of their snake-cased name; values with neither are skipped.
fn catalog_from_values(values: Vec<CustomValue>) -> FieldCatalog {
    let mut catalog = FieldCatalog::default();

    for value in values {
        let key = match (value.field_key.as_deref(), value.name.as_deref()) {
            (Some(field_key), _) if !field_key.trim().is_empty() => field_key.trim().to_string(),
            (_, Some(name)) if !name.trim().is_empty() => {
                template_key(&name_to_snake(name))
            }
            _ => {
                tracing::debug!(field_id = %value.id, "Skipping custom value without key or name");
                continue;
            }
        };

        if let Some(name) = value.name.filter(|n| !n.is_empty()) {
            catalog.labels.insert(key.clone(), name);
        }
        catalog.mappings.insert(key, value.id);
    }

    catalog
}

/// `Business Phone No` and `businessPhoneNo` both become `business_phone_no`.
fn name_to_snake(name: &str) -> String {
    name.split_whitespace()
        .map(|word| camel_to_snake(word).trim_start_matches('_').to_string())
        .collect::<Vec<_>>()
        .join("_")
}
