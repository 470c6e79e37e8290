//! Field-name resolution against a location's custom-value catalog.
//!
//! Callers name fields in camelCase (`businessPhone`). The provider stores
//! custom values under templated keys (`{{ custom_values.business_phone_no }}`).
//! Resolution is: snake_case transform, then the override table, then the
//! template, then a lookup in the location's stored mappings.

pub mod catalog;

pub use catalog::build_mappings;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snake keys whose provider-side name differs from the mechanical transform.
const KEY_OVERRIDES: &[(&str, &str)] = &[
    ("agent_jurisdiction", "agent_governing_jurisdiction"),
    ("agent_state", "agent_governing_state"),
    ("agent_address", "agent_mailing_address"),
    ("producer_number", "national_producer_number"),
    ("business_phone", "business_phone_no"),
    ("mb_api_key", "marketing_boost_api_key"),
    ("mb_business_id", "marketing_boost_business_id"),
    ("mb_sender_id", "marketing_boost_sender_id"),
];

/// Inserts `_` before every ASCII uppercase letter and lowercases the result.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// Wraps a snake key in the provider's custom-value template syntax.
pub fn template_key(snake: &str) -> String {
    format!("{{{{ custom_values.{snake} }}}}")
}

/// Canonical stored key for a caller-supplied field name.
pub fn canonical_key(field_name: &str) -> String {
    let snake = camel_to_snake(field_name);
    let resolved = KEY_OVERRIDES
        .iter()
        .find(|(from, _)| *from == snake)
        .map_or(snake.as_str(), |(_, to)| to);
    template_key(resolved)
}

/// Outcome of resolving one caller field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Mapped {
        key: String,
        field_id: String,
        label: Option<String>,
    },
    NotMapped {
        key: String,
    },
}

/// A location's custom-value catalog: templated key → remote id, and the
/// display name for each key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCatalog {
    pub mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl FieldCatalog {
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn resolve(&self, field_name: &str) -> Resolution {
        let key = canonical_key(field_name);
        match self.mappings.get(&key) {
            Some(field_id) => Resolution::Mapped {
                field_id: field_id.clone(),
                label: self.labels.get(&key).cloned(),
                key,
            },
            None => Resolution::NotMapped { key },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(entries: &[(&str, &str)]) -> FieldCatalog {
        FieldCatalog {
            mappings: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("businessPhone"), "business_phone");
        assert_eq!(camel_to_snake("agentState"), "agent_state");
        assert_eq!(camel_to_snake("mbApiKey"), "mb_api_key");
        assert_eq!(camel_to_snake("already_snake"), "already_snake");
        assert_eq!(camel_to_snake("URL"), "_u_r_l");
        assert_eq!(camel_to_snake(""), "");
    }

    #[test]
    fn test_template_key() {
        assert_eq!(template_key("agent_name"), "{{ custom_values.agent_name }}");
    }

    #[test]
    fn test_override_applied_after_snake_transform() {
        assert_eq!(
            canonical_key("agentState"),
            "{{ custom_values.agent_governing_state }}"
        );
        assert_eq!(
            canonical_key("businessPhone"),
            "{{ custom_values.business_phone_no }}"
        );
        assert_eq!(
            canonical_key("mbSenderId"),
            "{{ custom_values.marketing_boost_sender_id }}"
        );
        // snake_case input hits the same override
        assert_eq!(
            canonical_key("agent_state"),
            "{{ custom_values.agent_governing_state }}"
        );
    }

    #[test]
    fn test_no_override_uses_mechanical_key() {
        assert_eq!(canonical_key("agentName"), "{{ custom_values.agent_name }}");
    }

    #[test]
    fn test_resolve_mapped_through_override() {
        let catalog = catalog(&[("{{ custom_values.agent_governing_state }}", "id123")]);

        match catalog.resolve("agentState") {
            Resolution::Mapped { field_id, key, .. } => {
                assert_eq!(field_id, "id123");
                assert_eq!(key, "{{ custom_values.agent_governing_state }}");
            }
            other => panic!("expected mapping, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_mechanical_key_not_used_when_overridden() {
        // Only the mechanically derived key exists; the override points elsewhere.
        let catalog = catalog(&[("{{ custom_values.agent_state }}", "wrong")]);
        assert_eq!(
            catalog.resolve("agentState"),
            Resolution::NotMapped {
                key: "{{ custom_values.agent_governing_state }}".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_carries_label() {
        let mut catalog = catalog(&[("{{ custom_values.agent_name }}", "f1")]);
        catalog.labels.insert(
            "{{ custom_values.agent_name }}".to_string(),
            "Agent Name".to_string(),
        );

        let Resolution::Mapped { label, .. } = catalog.resolve("agentName") else {
            panic!("expected mapping");
        };
        assert_eq!(label.as_deref(), Some("Agent Name"));
    }
}
