//! Error types and handling
//!
//! Aggregates the per-subsystem errors for callers that drive the whole
//! recorder, and maps them to the JSON error body used by the HTTP trigger.

use crate::capture::{BufferError, CaptureError};
use crate::config::ConfigError;
use crate::export::ExportError;
use crate::trigger::TriggerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Buffer(_) => "BUFFER_ERROR",
            AppError::Capture(CaptureError::OpenFailed { .. }) => "CAMERA_OPEN_FAILED",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Export(_) => "EXPORT_ERROR",
            AppError::Trigger(e) if e.is_configuration() => "TRIGGER_CONFIG_ERROR",
            AppError::Trigger(_) => "TRIGGER_ERROR",
            AppError::Recorder(_) => "RECORDER_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error body returned to remote callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerType;

    #[test]
    fn test_error_codes() {
        let err: AppError = TriggerError::NotAllowed(TriggerType::Gpio).into();
        assert_eq!(err.code(), "TRIGGER_CONFIG_ERROR");

        let err: AppError = CaptureError::OpenFailed {
            device: 2,
            reason: "busy".to_string(),
        }
        .into();
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "CAMERA_OPEN_FAILED");
        assert!(response.message.contains("camera 2"));
    }
}
