use crate::error::BridgeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Error type for API handlers. Messages are client-safe; internal detail is
/// logged where the error is converted.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Validation(msg) => AppError::BadRequest(msg),
            BridgeError::NotFound(location_id) => {
                AppError::NotFound(format!("Location '{}' is not installed", location_id))
            }
            BridgeError::Exchange(e) => {
                error!(error = %e, "Authorization code exchange failed");
                AppError::ServerError("Failed to exchange authorization code".to_string())
            }
            BridgeError::Refresh(e) => {
                error!(error = %e, "Access token refresh failed");
                AppError::ServerError("Failed to refresh access token".to_string())
            }
            BridgeError::MissingRefreshToken => {
                error!("Token endpoint returned no refresh token");
                AppError::ServerError("Incomplete token response from provider".to_string())
            }
            BridgeError::Vault(e) => {
                error!(error = %e, "Stored credentials could not be decrypted");
                AppError::ServerError("Stored credentials are unreadable".to_string())
            }
            BridgeError::Provider(e) => {
                error!(error = %e, "Provider request failed");
                AppError::BadGateway("Provider request failed".to_string())
            }
            BridgeError::Storage(e) => {
                error!(error = %format!("{:#}", e), "Storage failure");
                AppError::ServerError("Internal storage error".to_string())
            }
        }
    }
}
