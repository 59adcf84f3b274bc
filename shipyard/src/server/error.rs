//! Mapping of control-plane errors to HTTP responses

use api_models::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::errors::ControlError;

/// Handler error; renders as `{error, message}` with a matching status
#[derive(Debug)]
pub struct ApiError(pub ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &ControlError) -> StatusCode {
    match err {
        ControlError::NotFound(_) => StatusCode::NOT_FOUND,
        ControlError::ValidationError(_) | ControlError::SsrfBlocked(_) | ControlError::JsonError(_) => {
            StatusCode::BAD_REQUEST
        }
        ControlError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ControlError::InvalidState(_) => StatusCode::CONFLICT,
        ControlError::ProviderError { .. } | ControlError::HttpError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        // provider output stays in deployment logs
        let message = match &self.0 {
            ControlError::ProviderError { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
