//! Error types for the upload queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::MediaFile;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Machine readable classification of an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    GeneralError,
    ImageRotationError,
    ImageTranscodingError,
    MediaTranscodingError,
    UploadError,
    SideloadError,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::GeneralError => "general-error",
            ErrorCode::ImageRotationError => "image-rotation-error",
            ErrorCode::ImageTranscodingError => "image-transcoding-error",
            ErrorCode::MediaTranscodingError => "media-transcoding-error",
            ErrorCode::UploadError => "upload-error",
            ErrorCode::SideloadError => "sideload-error",
            ErrorCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed collaborator error kept as the cause of an [`UploadError`].
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync>;

/// Failure of a single queue item.
///
/// Carries the offending file so callbacks can tell the user which upload
/// failed, and optionally the collaborator error that caused it.
#[derive(Error, Debug, Clone)]
#[error("{message} ({code})")]
pub struct UploadError {
    pub code: ErrorCode,
    pub message: String,
    pub file: Option<MediaFile>,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl UploadError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            file: None,
            cause: None,
        }
    }

    pub fn with_file(mut self, file: &MediaFile) -> Self {
        self.file = Some(file.clone());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Upload cancelled")
    }
}

/// Error reported by the transport or image-processing collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("operation aborted")]
    Aborted,

    #[error("request failed: {0}")]
    Failed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CollaboratorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::ImageRotationError.as_str(), "image-rotation-error");
        assert_eq!(
            ErrorCode::ImageTranscodingError.to_string(),
            "image-transcoding-error"
        );
        let json = serde_json::to_string(&ErrorCode::MediaTranscodingError).unwrap();
        assert_eq!(json, "\"media-transcoding-error\"");
    }

    #[test]
    fn test_upload_error_keeps_cause_and_file() {
        let file = MediaFile::new("cat.png", "image/png", vec![1, 2, 3]);
        let err = UploadError::new(ErrorCode::UploadError, "File could not be uploaded")
            .with_file(&file)
            .with_cause(CollaboratorError::failed("503"));

        assert_eq!(err.file.as_ref().map(|f| f.name.as_str()), Some("cat.png"));
        assert_eq!(err.to_string(), "File could not be uploaded (upload-error)");
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("request failed: 503".to_string())
        );
    }

    #[test]
    fn test_crate_error_from_upload_error() {
        let err: Error = UploadError::cancelled().into();
        assert!(matches!(err, Error::Upload(ref e) if e.code == ErrorCode::Cancelled));
    }
}
