use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::common::response::ApiError;

/// Why a transcode job did not produce output.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoding engine `{0}` is not available")]
    EngineUnavailable(String),

    #[error("transcoding engine failed: {0}")]
    EngineError(String),

    #[error("transcoding timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

impl TranscodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            TranscodeError::EngineUnavailable(_) => "engine_unavailable",
            TranscodeError::EngineError(_) => "engine_error",
            TranscodeError::Timeout(_) => "timeout",
        }
    }
}

/// Everything that can end a `/convert` request early.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("no file provided")]
    NoFileProvided(Option<String>),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("upload exceeds the size limit")]
    UploadTooLarge(String),

    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("failed to deliver converted file: {0}")]
    Delivery(String),

    #[error("scratch storage error: {0}")]
    Internal(#[from] std::io::Error),
}

impl ConvertError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::NoFileProvided(_) => "no_file_provided",
            ConvertError::InvalidUpload(_) => "invalid_upload",
            ConvertError::UploadTooLarge(_) => "upload_too_large",
            ConvertError::UnsupportedMediaType(_) => "unsupported_media_type",
            ConvertError::Transcode(e) => e.kind(),
            ConvertError::Delivery(_) => "delivery_error",
            ConvertError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ConvertError::NoFileProvided(_) | ConvertError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            ConvertError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ConvertError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ConvertError::Transcode(_) | ConvertError::Delivery(_) | ConvertError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ConvertError::NoFileProvided(_) => "No file uploaded",
            ConvertError::InvalidUpload(_) => "Malformed upload",
            ConvertError::UploadTooLarge(_) => "Uploaded file is too large",
            ConvertError::UnsupportedMediaType(_) => "Only video uploads are accepted",
            ConvertError::Transcode(TranscodeError::EngineUnavailable(_)) => {
                "FFmpeg is not installed on the server"
            }
            ConvertError::Transcode(TranscodeError::EngineError(_)) => "Conversion failed",
            ConvertError::Transcode(TranscodeError::Timeout(_)) => "Conversion timed out",
            ConvertError::Delivery(_) => "Failed to send the converted file",
            ConvertError::Internal(_) => "Server error during conversion",
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ConvertError::NoFileProvided(detail) => detail.clone(),
            ConvertError::InvalidUpload(detail)
            | ConvertError::UploadTooLarge(detail)
            | ConvertError::Delivery(detail) => Some(detail.clone()),
            ConvertError::UnsupportedMediaType(_) | ConvertError::Transcode(_) | ConvertError::Internal(_) => {
                Some(self.to_string())
            }
        }
    }
}

impl From<MultipartError> for ConvertError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ConvertError::UploadTooLarge(err.body_text())
        } else {
            ConvertError::InvalidUpload(err.body_text())
        }
    }
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), "Conversion failed: {}", self);
        } else {
            warn!(kind = self.kind(), "Rejected conversion request: {}", self);
        }

        let mut api_error = ApiError::new(status, self.kind(), self.summary());
        if let Some(details) = self.details() {
            api_error = api_error.with_details(details);
        }
        api_error.into_response()
    }
}
