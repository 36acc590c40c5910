//! Error types for the S3 sink

use thiserror::Error;

use crate::upload::SessionStatus;

/// Result type for sink and session operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Storage-specific errors raised by an [`ObjectStore`](crate::storage::ObjectStore)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Multipart upload not found: {0}")]
    UploadNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid part list: {0}")]
    InvalidPart(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

/// Errors surfaced by an upload session
///
/// The multipart variants follow the lifecycle of a single upload:
/// `Start` needs no cleanup, `PartUpload` is raised after a best-effort
/// abort, `Completion` is raised without any further store call, and
/// `Abort` is only ever logged since it must not hide the error that
/// triggered the abort.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to start multipart upload for {key}: {source}")]
    Start {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to upload part {part_number} of {upload_id}: {source}")]
    PartUpload {
        upload_id: String,
        part_number: u32,
        #[source]
        source: StorageError,
    },

    #[error("Failed to complete multipart upload {upload_id}: {source}")]
    Completion {
        upload_id: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to abort multipart upload {upload_id}: {source}")]
    Abort {
        upload_id: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to write empty object {key}: {source}")]
    EmptyObject {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Source stream failed: {0}")]
    Source(#[from] std::io::Error),

    #[error("Too many parts: part {part_number} exceeds the limit of {max}")]
    TooManyParts { part_number: usize, max: u32 },

    #[error("Session already finished ({0:?})")]
    SessionFinished(SessionStatus),
}

impl UploadError {
    /// The storage error underneath a store-call failure, if any
    pub fn storage_cause(&self) -> Option<&StorageError> {
        match self {
            Self::Start { source, .. }
            | Self::PartUpload { source, .. }
            | Self::Completion { source, .. }
            | Self::Abort { source, .. }
            | Self::EmptyObject { source, .. } => Some(source),
            Self::Source(_) | Self::TooManyParts { .. } | Self::SessionFinished(_) => None,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}
