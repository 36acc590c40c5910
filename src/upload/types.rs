//! Upload types for streaming multipart uploads

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::UploadError;

// ============================================================================
// Constants
// ============================================================================

/// Smallest part S3 accepts for any part but the last: 5MB
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default part size: 10MB
pub const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: u32 = 10_000;

// ============================================================================
// Handle and Parts
// ============================================================================

/// Identifies one multipart transaction on the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadHandle {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
}

impl UploadHandle {
    pub fn new(
        upload_id: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// A contiguous slice of the source stream, numbered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based arrival index
    pub index: usize,
    pub bytes: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The 1-based part number the store expects for this chunk
    pub fn part_number(&self) -> usize {
        self.index + 1
    }
}

/// The store's acknowledgment of one uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
}

// ============================================================================
// Outcome
// ============================================================================

/// How the streaming stage of a session ended
#[derive(Debug)]
pub enum UploadOutcome {
    /// The source was fully drained and every part was acknowledged
    Completed,
    /// The caller signaled cancellation before the source was drained
    Canceled,
    /// Reading the source or uploading a part failed
    Failed(UploadError),
}

impl UploadOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            UploadOutcome::Completed => "completed",
            UploadOutcome::Canceled => "canceled",
            UploadOutcome::Failed(_) => "failed",
        }
    }
}

/// What a successful `write` did with the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// The object is fully assembled on the store
    Completed,
    /// The upload was canceled and aborted; no object was written
    Canceled,
}

// ============================================================================
// Session Types
// ============================================================================

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No multipart upload exists yet
    NotStarted,
    /// The store assigned an upload id
    Started,
    /// Parts are being uploaded
    Streaming,
    /// The completion call is in flight
    Completing,
    /// The object is assembled
    Completed,
    /// The abort call is in flight
    Aborting,
    /// The upload was canceled and aborted
    Aborted,
    /// The session ended with an error
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Failed
        )
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub key: String,
    /// `None` when no multipart upload was needed (empty source)
    pub upload_id: Option<String>,
    pub disposition: Disposition,
    /// Parts acknowledged by the store
    pub parts: usize,
    /// Bytes acknowledged by the store
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
