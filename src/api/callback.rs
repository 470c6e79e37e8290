use super::{AppError, AppState};
use crate::install::InstallOutcome;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// OAuth redirect query parameters
#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    #[serde(rename = "locationId")]
    location_id: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub fn create_callback_router(state: AppState) -> Router {
    Router::new()
        .route("/callback", get(oauth_callback))
        .route("/api/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// GET /callback
///
/// Completes the install when the matching notification is already parked
/// (302 to the confirmation page), otherwise parks the code (202). A code
/// that was redeemed before is refused with 409.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    debug!("OAuth callback received");

    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;

    let outcome = state
        .installs
        .on_authorization_code(&code, params.location_id.as_deref())
        .await?;

    match outcome {
        InstallOutcome::Completed { location_id } => {
            info!(location_id = %location_id, "OAuth flow completed successfully");
            Ok((
                StatusCode::FOUND,
                [(header::LOCATION, state.confirmation_url.as_str())],
            )
                .into_response())
        }
        InstallOutcome::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pending",
                "message": "Authorization received, waiting for install notification"
            })),
        )
            .into_response()),
        InstallOutcome::AlreadyRedeemed => Err(AppError::Conflict(
            "Authorization code has already been used".to_string(),
        )),
    }
}
