//! Relays caller field updates into the location's custom values.
//!
//! A batch is first planned against the stored catalog (no I/O), then the
//! mapped entries are written with bounded concurrency. One failed write
//! never stops the others; the report carries a result per input field in
//! input order.

use crate::mapping::{FieldCatalog, Resolution};
use crate::provider::ProviderClient;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// One caller-supplied `{fieldName, value}` pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldUpdate {
    pub field_name: String,
    #[serde(default)]
    pub value: Value,
}

impl FieldUpdate {
    pub fn new(field_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field_name: field_name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Empty string or null
    Blank,
    /// Arrays and objects
    UnsupportedValue,
    /// No custom value matches the resolved key
    NotMapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Written,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResult {
    pub field_name: String,
    pub outcome: FieldOutcome,
}

impl FieldResult {
    pub fn success(&self) -> bool {
        self.outcome == FieldOutcome::Written
    }
}

// {fieldName, success} plus `skipped` or `error` when the write did not happen
impl Serialize for FieldResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let extra = usize::from(!self.success());
        let mut map = serializer.serialize_map(Some(2 + extra))?;
        map.serialize_entry("fieldName", &self.field_name)?;
        map.serialize_entry("success", &self.success())?;
        match &self.outcome {
            FieldOutcome::Written => {}
            FieldOutcome::Skipped(reason) => map.serialize_entry("skipped", reason)?,
            FieldOutcome::Failed(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlannedField {
    Write {
        field_name: String,
        field_id: String,
        label: String,
        value: String,
    },
    Skip {
        field_name: String,
        reason: SkipReason,
    },
}

/// Per-field decisions for one batch, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    entries: Vec<PlannedField>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fields that will produce a provider write.
    pub fn write_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, PlannedField::Write { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub results: Vec<FieldResult>,
}

impl SyncReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed_fields().is_empty()
    }

    pub fn failed_fields(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, FieldOutcome::Failed(_)))
            .map(|r| r.field_name.as_str())
            .collect()
    }
}

pub struct FieldSyncDispatcher {
    provider: ProviderClient,
    write_concurrency: usize,
}

impl FieldSyncDispatcher {
    pub fn new(provider: ProviderClient, write_concurrency: usize) -> Self {
        Self {
            provider,
            write_concurrency: write_concurrency.max(1),
        }
    }

    /// Classifies each update against the catalog without touching the network.
    pub fn plan(catalog: &FieldCatalog, updates: Vec<FieldUpdate>) -> SyncPlan {
        let entries = updates
            .into_iter()
            .map(|update| {
                let FieldUpdate { field_name, value } = update;

                let value = match value_to_text(&value) {
                    Ok(text) => text,
                    Err(reason) => return PlannedField::Skip { field_name, reason },
                };

                match catalog.resolve(&field_name) {
                    Resolution::Mapped {
                        field_id, label, ..
                    } => PlannedField::Write {
                        label: label.unwrap_or_else(|| field_name.clone()),
                        field_name,
                        field_id,
                        value,
                    },
                    Resolution::NotMapped { key } => {
                        tracing::debug!(field = %field_name, key = %key, "No custom value for field");
                        PlannedField::Skip {
                            field_name,
                            reason: SkipReason::NotMapped,
                        }
                    }
                }
            })
            .collect();

        SyncPlan { entries }
    }

    /// Performs the planned writes, at most `write_concurrency` at a time.
    pub async fn execute(&self, location_id: &str, access_token: &str, plan: SyncPlan) -> SyncReport {
        let provider = &self.provider;

        let results = stream::iter(plan.entries)
            .map(|entry| async move {
                match entry {
                    PlannedField::Skip { field_name, reason } => FieldResult {
                        field_name,
                        outcome: FieldOutcome::Skipped(reason),
                    },
                    PlannedField::Write {
                        field_name,
                        field_id,
                        label,
                        value,
                    } => {
                        let outcome = match provider
                            .update_custom_value(location_id, access_token, &field_id, &label, &value)
                            .await
                        {
                            Ok(()) => FieldOutcome::Written,
                            Err(e) => {
                                tracing::warn!(
                                    location_id = %location_id,
                                    field = %field_name,
                                    "Custom value write failed: {}",
                                    e
                                );
                                FieldOutcome::Failed(e.to_string())
                            }
                        };
                        FieldResult {
                            field_name,
                            outcome,
                        }
                    }
                }
            })
            .buffered(self.write_concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = SyncReport { results };
        tracing::info!(
            location_id = %location_id,
            fields = report.results.len(),
            failed = report.failed_fields().len(),
            "Field sync finished"
        );
        report
    }

    pub async fn apply_updates(
        &self,
        location_id: &str,
        access_token: &str,
        catalog: &FieldCatalog,
        updates: Vec<FieldUpdate>,
    ) -> SyncReport {
        let plan = Self::plan(catalog, updates);
        self.execute(location_id, access_token, plan).await
    }
}

fn value_to_text(value: &Value) -> Result<String, SkipReason> {
    match value {
        Value::Null => Err(SkipReason::Blank),
        Value::String(s) if s.trim().is_empty() => Err(SkipReason::Blank),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(_) | Value::Object(_) => Err(SkipReason::UnsupportedValue),
    }
}
