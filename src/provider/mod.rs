//! HTTP client for the CRM platform's OAuth and REST endpoints.
//!
//! Every request carries the configured timeouts. Tenant-scoped calls send
//! `Authorization: Bearer <token>` and the pinned `Version` header.

mod custom_values;
mod menus;

pub use custom_values::CustomValue;
pub use menus::{CustomMenu, MenuIcon};

use crate::config::ProviderConfig;
use crate::credentials::TokenPair;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl ProviderError {
    /// HTTP status the provider answered with, if it answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// OAuth token response.
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Location the token was issued for, when the provider reports it.
    #[serde(default, rename = "locationId")]
    pub location_id: Option<String>,
}

impl TokenResponse {
    /// Builds the pair to persist. Providers that do not rotate the refresh
    /// token omit it, in which case `previous_refresh` is kept.
    pub fn into_pair(self, previous_refresh: Option<&str>) -> Option<TokenPair> {
        let refresh_token = self
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string))?;
        Some(TokenPair {
            access_token: self.access_token,
            refresh_token,
        })
    }
}

/// Client for the provider API.
#[derive(Clone)]
pub struct ProviderClient {
    http_client: Client,
    base_url: String,
    api_version: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    user_type: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|source| ProviderError::Transport {
                endpoint: "client",
                source,
            })?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            user_type: config.user_type.clone(),
        })
    }

    /// Shared reqwest client, reused for outbound notifications.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Exchanges an authorization code (`grant_type=authorization_code`).
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ProviderError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("user_type", self.user_type.as_str()),
        ];
        self.token_request(&form).await
    }

    /// Redeems a refresh token (`grant_type=refresh_token`).
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("user_type", self.user_type.as_str()),
        ];
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        const ENDPOINT: &str = "token endpoint";

        let url = format!("{}/oauth/token", self.base_url);
        tracing::debug!("Requesting token at {}", url);

        let request = self
            .http_client
            .post(&url)
            .header("Accept", "application/json")
            .form(form);
        let response = send(ENDPOINT, request).await?;

        response
            .json::<TokenResponse>()
            .await
            .map_err(|source| ProviderError::Decode {
                endpoint: ENDPOINT,
                source,
            })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header("Version", &self.api_version)
            .header("Accept", "application/json")
    }
}

/// Sends the request and turns non-2xx answers into [`ProviderError::Status`].
async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { endpoint, source })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string());
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(ProviderError::Status {
        endpoint,
        status,
        body,
    })
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        base_url: base_url.to_string(),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_uri: "https://bridge.example.com/callback".to_string(),
        ..ProviderConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "at_123",
            "refresh_token": "rt_456",
            "expires_in": 86399,
            "token_type": "Bearer",
            "locationId": "loc1"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "at_123");
        assert_eq!(response.refresh_token.as_deref(), Some("rt_456"));
        assert_eq!(response.expires_in, Some(86399));
        assert_eq!(response.location_id.as_deref(), Some("loc1"));
    }

    #[test]
    fn test_into_pair_keeps_previous_refresh_token() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"new"}"#).unwrap();
        let pair = response.into_pair(Some("old-refresh")).unwrap();
        assert_eq!(pair.access_token, "new");
        assert_eq!(pair.refresh_token, "old-refresh");

        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"new"}"#).unwrap();
        assert!(response.into_pair(None).is_none());
    }

    #[tokio::test]
    async fn test_exchange_code_sends_form() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "abc".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "https://bridge.example.com/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","refresh_token":"rt"}"#)
            .create_async()
            .await;

        let client = ProviderClient::new(&test_config(&server.url())).unwrap();
        let response = client.exchange_code("abc").await.unwrap();

        assert_eq!(response.access_token, "at");
        assert_eq!(response.refresh_token.as_deref(), Some("rt"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejected_maps_to_status_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(401)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = ProviderClient::new(&test_config(&server.url())).unwrap();
        let err = client.refresh_token("revoked").await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let client = ProviderClient::new(&test_config("http://127.0.0.1:9")).unwrap();
        let err = client.exchange_code("abc").await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }
}
