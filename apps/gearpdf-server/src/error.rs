//! Error types for the GearPDF server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with what the client sent
#[derive(Error, Debug)]
pub enum InvalidInputError {
    #[error("Uploaded file is empty")]
    Empty,

    #[error("Uploaded file is not a PDF")]
    NotPdf,

    #[error("Uploaded PDF is truncated (no %%EOF marker)")]
    Truncated,

    #[error("File too large (max: {max} bytes)")]
    TooLarge { max: usize },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Unknown compression profile: {0}")]
    UnknownProfile(String),

    #[error("Invalid target size: {0}")]
    InvalidTargetSize(String),

    #[error("No file provided")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    Malformed(String),
}

/// Failures of the external compression tool
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Compression tool unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to start compression tool: {0}")]
    Spawn(String),

    #[error("Compression tool exited with {}: {stderr}", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },

    #[error("Compression timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to rewrite PDF: {0}")]
    Rewrite(String),

    #[error("Compression tool produced no output")]
    NoOutput,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl InvalidInputError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "empty_file",
            Self::NotPdf => "not_a_pdf",
            Self::Truncated => "truncated_pdf",
            Self::TooLarge { .. } => "file_too_large",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::UnknownProfile(_) => "unknown_profile",
            Self::InvalidTargetSize(_) => "invalid_target_size",
            Self::MissingFile => "missing_file",
            Self::Malformed(_) => "malformed_upload",
        }
    }
}

impl ProcessingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "compressor_unavailable",
            Self::Spawn(_) => "compressor_spawn_failed",
            Self::Failed { .. } => "compression_failed",
            Self::Timeout(_) => "compression_timeout",
            Self::Rewrite(_) => "rewrite_failed",
            Self::NoOutput => "compression_no_output",
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::InvalidInput(e) => {
                tracing::debug!("Rejected upload: {}", e);
                (e.status_code(), e.code(), e.to_string())
            }
            AppError::Processing(e) => {
                tracing::warn!("Compression failed: {}", e);
                (e.status_code(), e.code(), e.to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
