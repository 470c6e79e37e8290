//! Operator endpoints. Disabled (404) unless an admin token is configured.

use super::{AppError, AppState};
use crate::error::BridgeError;
use crate::mapping::build_mappings;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLookup {
    location_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDebugResponse {
    location_id: String,
    access_token: String,
    refresh_token: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRebuildResponse {
    location_id: String,
    fields: usize,
}

pub fn create_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/tokens", post(debug_tokens))
        .route(
            "/api/admin/locations/:location_id/mappings",
            post(rebuild_mappings),
        )
        .with_state(Arc::new(state))
}

/// POST /api/admin/tokens: decrypted tokens for one location.
async fn debug_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(lookup): Json<TokenLookup>,
) -> Result<Json<TokenDebugResponse>, AppError> {
    authorize(&headers, &state.admin_token)?;

    let record = state
        .store
        .get(&lookup.location_id)
        .map_err(BridgeError::from)?
        .ok_or_else(|| BridgeError::NotFound(lookup.location_id.clone()))?;
    let tokens = state
        .store
        .decrypt_tokens(&record)
        .map_err(BridgeError::from)?;

    info!(location_id = %record.location_id, "Admin token lookup");

    Ok(Json(TokenDebugResponse {
        location_id: record.location_id,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

/// POST /api/admin/locations/:location_id/mappings: refetch the catalog.
async fn rebuild_mappings(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MappingRebuildResponse>, AppError> {
    authorize(&headers, &state.admin_token)?;

    let access_token = state.tokens.ensure_valid_access_token(&location_id).await?;
    let catalog = build_mappings(state.tokens.provider(), &location_id, &access_token)
        .await
        .map_err(BridgeError::from)?;

    if !state
        .store
        .replace_mappings(&location_id, &catalog)
        .map_err(BridgeError::from)?
    {
        return Err(BridgeError::NotFound(location_id).into());
    }

    info!(location_id = %location_id, fields = catalog.mappings.len(), "Field catalog rebuilt");

    Ok(Json(MappingRebuildResponse {
        location_id,
        fields: catalog.mappings.len(),
    }))
}

/// Checks `Authorization: Bearer <token>` against the configured admin token.
fn authorize(headers: &HeaderMap, expected: &Option<String>) -> Result<(), AppError> {
    let Some(expected_token) = expected else {
        return Err(AppError::NotFound("Not found".to_string()));
    };

    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if token == expected_token => Ok(()),
        _ => Err(AppError::Unauthorized("Unauthorized".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_authorize() {
        let expected = Some("admin-secret".to_string());

        assert!(authorize(&headers("Bearer admin-secret"), &expected).is_ok());
        assert!(matches!(
            authorize(&headers("Bearer wrong"), &expected),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&headers("admin-secret"), &expected),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&HeaderMap::new(), &expected),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_disabled_without_token() {
        assert!(matches!(
            authorize(&headers("Bearer anything"), &None),
            Err(AppError::NotFound(_))
        ));
    }
}
