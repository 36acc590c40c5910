//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3 through
//! [`S3Client`], plus an in-process [`MemoryStore`].

mod memory;
mod s3_client;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::upload::{CompletedPart, UploadHandle};

pub use memory::{MemoryStore, StoreCall};
pub use s3_client::S3Client;

/// Multipart operations of an object store
///
/// Implementations are shared read-only by every part upload of a session,
/// so they must be cheap to call concurrently.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload and return the store-assigned upload id
    async fn create_multipart_upload(&self, bucket: &str, key: &str)
        -> Result<String, StorageError>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        handle: &UploadHandle,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StorageError>;

    /// Assemble the object from `parts`, ordered by part number
    async fn complete_multipart_upload(
        &self,
        handle: &UploadHandle,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    /// Discard the upload and every part uploaded so far
    async fn abort_multipart_upload(&self, handle: &UploadHandle) -> Result<(), StorageError>;

    /// Write a whole object in one request
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), StorageError>;
}
