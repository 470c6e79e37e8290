use super::{AppError, AppState};
use crate::error::BridgeError;
use crate::sync::{FieldSyncDispatcher, FieldUpdate, SyncReport};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

pub fn create_fields_router(state: AppState) -> Router {
    Router::new()
        .route("/submit-fields", post(submit_fields).options(preflight))
        .route(
            "/api/submit-ghl-fields",
            post(submit_fields).options(preflight),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// POST /submit-fields
///
/// Accepts `{locationId, updates: [{fieldName, value}]}` or a flat
/// `{locationId, <fieldName>: <value>}` object.
async fn submit_fields(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let (location_id, updates) = parse_submission(body)?;
    debug!(location_id = %location_id, fields = updates.len(), "Field submission received");

    let record = state
        .store
        .get(&location_id)
        .map_err(BridgeError::from)?
        .ok_or_else(|| BridgeError::NotFound(location_id.clone()))?;

    let plan = FieldSyncDispatcher::plan(&record.field_catalog, updates);
    if plan.write_count() == 0 {
        warn!(location_id = %location_id, "No submitted field maps to a custom value");
        return Err(AppError::BadRequest(
            "None of the submitted fields could be resolved".to_string(),
        ));
    }

    let access_token = state.tokens.ensure_valid_access_token(&location_id).await?;
    let report = state
        .dispatcher
        .execute(&location_id, &access_token, plan)
        .await;

    let body = if report.all_succeeded() {
        json!({ "ok": true, "results": report.results })
    } else {
        json!({
            "ok": false,
            "results": report.results,
            "failedFields": report.failed_fields(),
        })
    };

    Ok((report_status(&report), Json(body)).into_response())
}

/// 207 when any write failed, 200 otherwise. Skipped fields do not count.
fn report_status(report: &SyncReport) -> StatusCode {
    if report.all_succeeded() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    }
}

fn parse_submission(body: Value) -> Result<(String, Vec<FieldUpdate>), AppError> {
    let Value::Object(mut object) = body else {
        return Err(AppError::BadRequest("Body must be a JSON object".to_string()));
    };

    let location_id = match object.shift_remove("locationId") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        _ => return Err(AppError::BadRequest("Missing 'locationId'".to_string())),
    };

    let updates = match object.shift_remove("updates") {
        Some(updates @ Value::Array(_)) => serde_json::from_value::<Vec<FieldUpdate>>(updates)
            .map_err(|e| AppError::BadRequest(format!("Invalid 'updates': {}", e)))?,
        Some(other) => {
            object.insert("updates".to_string(), other);
            flat_updates(object)
        }
        None => flat_updates(object),
    };

    if updates.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    Ok((location_id, updates))
}

fn flat_updates(object: Map<String, Value>) -> Vec<FieldUpdate> {
    object
        .into_iter()
        .map(|(field_name, value)| FieldUpdate { field_name, value })
        .collect()
}
