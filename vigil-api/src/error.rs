//! HTTP mapping for controller errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vigil_core::VigilError;

/// Wrapper turning [`VigilError`] into an HTTP response.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub VigilError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Admin preconditions not met: the request conflicts with the
            // cluster's current state.
            VigilError::InvalidTarget { .. }
            | VigilError::NoQuorum { .. }
            | VigilError::NoEligibleCandidate { .. } => StatusCode::CONFLICT,
            VigilError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            VigilError::Config { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
