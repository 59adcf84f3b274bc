//! Error types for the Shipyard control plane

use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Tooling missing or not authenticated. User-actionable, never retried.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote build or deploy failure with the captured process output
    #[error("Provider error: {message}")]
    ProviderError {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Blocked outbound URL: {0}")]
    SsrfBlocked(String),

    /// Operation not valid for the record's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    pub fn provider(message: impl Into<String>) -> Self {
        ControlError::ProviderError {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Configuration failures are surfaced to the user and never retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::ProviderError { .. }
                | ControlError::Timeout(_)
                | ControlError::HttpError(_)
                | ControlError::IoError(_)
        )
    }

    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::IoError(_) => "io_error",
            ControlError::JsonError(_) => "json_error",
            ControlError::HttpError(_) => "http_error",
            ControlError::ConfigError(_) => "configuration_error",
            ControlError::ValidationError(_) => "validation_error",
            ControlError::NotFound(_) => "not_found",
            ControlError::PermissionDenied(_) => "permission_denied",
            ControlError::ProviderError { .. } => "provider_error",
            ControlError::Timeout(_) => "timeout",
            ControlError::SsrfBlocked(_) => "ssrf_blocked",
            ControlError::InvalidState(_) => "invalid_state",
            ControlError::ServerError(_) => "server_error",
            ControlError::ShutdownError(_) => "shutdown_error",
            ControlError::Internal(_) => "internal_error",
        }
    }
}

impl From<anyhow::Error> for ControlError {
    fn from(err: anyhow::Error) -> Self {
        ControlError::Internal(err.to_string())
    }
}
