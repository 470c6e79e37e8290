use super::{AppError, AppState};
use crate::error::BridgeError;
use crate::install::InstallOutcome;
use axum::{
    extract::State,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Lifecycle event posted by the platform
#[derive(Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "locationId")]
    location_id: Option<String>,
}

pub fn create_webhook_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(lifecycle_webhook))
        .route("/api/ghl-webhook", post(lifecycle_webhook))
        .with_state(Arc::new(state))
}

/// POST /webhook
///
/// Only storage failures produce a non-2xx answer; the platform retries on
/// those. An install whose code exchange fails is logged and acknowledged,
/// since a retry cannot succeed with the same single-use code.
async fn lifecycle_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<Value>, AppError> {
    let kind = event
        .kind
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'type'".to_string()))?;
    let location_id = event
        .location_id
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'locationId'".to_string()))?;

    info!(event = %kind, location_id = %location_id, "Lifecycle webhook received");

    let status = match kind.as_str() {
        "INSTALL" => match state.installs.on_install(&location_id).await {
            Ok(InstallOutcome::Completed { .. }) => "completed",
            Ok(InstallOutcome::Pending) => "pending",
            Ok(InstallOutcome::AlreadyRedeemed) => "duplicate",
            Err(e @ BridgeError::Storage(_)) => return Err(e.into()),
            Err(e) => {
                error!(location_id = %location_id, error = %e, "Install could not be completed");
                "failed"
            }
        },
        "UNINSTALL" => {
            state.installs.on_uninstall(&location_id).await?;
            "uninstalled"
        }
        other => {
            debug!(event = %other, "Ignoring unhandled webhook type");
            "ignored"
        }
    };

    Ok(Json(json!({ "ok": true, "status": status })))
}
