//! Fire-and-forget lifecycle notifications to an operator webhook.

use crate::config::NotifyConfig;
use crate::credentials::TokenPair;
use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleEvent {
    Install,
    Uninstall,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Payload<'a> {
    #[serde(rename = "type")]
    kind: LifecycleEvent,
    location_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Clone)]
pub struct Notifier {
    http_client: Client,
    webhook_url: Option<String>,
    forward_tokens: bool,
}

impl Notifier {
    pub fn new(http_client: Client, config: &NotifyConfig) -> Self {
        Self {
            http_client,
            webhook_url: config.webhook_url.clone().filter(|u| !u.is_empty()),
            forward_tokens: config.forward_tokens,
        }
    }

    /// Posts `{type, locationId}` in the background. Tokens are attached only
    /// when forwarding is enabled. Returns `None` when no webhook is set.
    ///
    /// Delivery failures are logged and otherwise ignored.
    pub fn send(
        &self,
        event: LifecycleEvent,
        location_id: &str,
        tokens: Option<&TokenPair>,
    ) -> Option<JoinHandle<()>> {
        let url = self.webhook_url.clone()?;
        let tokens = tokens.filter(|_| self.forward_tokens);

        let body = match serde_json::to_value(Payload {
            kind: event,
            location_id,
            access_token: tokens.map(|t| t.access_token.as_str()),
            refresh_token: tokens.map(|t| t.refresh_token.as_str()),
        }) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to encode notification: {}", e);
                return None;
            }
        };

        let client = self.http_client.clone();
        let location_id = location_id.to_string();

        Some(tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => tracing::debug!(location_id = %location_id, event = ?event, "Notification delivered"),
                Err(e) => tracing::warn!(
                    location_id = %location_id,
                    event = ?event,
                    "Notification delivery failed: {}",
                    e
                ),
            }
        }))
    }
}
