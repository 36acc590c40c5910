//! Part Uploader
//!
//! Turns chunks into uploaded parts of one multipart upload.

use std::sync::Arc;

use super::types::{Chunk, CompletedPart, UploadHandle, MAX_PARTS};
use crate::error::{Result, UploadError};
use crate::storage::ObjectStore;

/// Uploads chunks as parts of a single multipart upload
#[derive(Clone)]
pub struct PartUploader {
    store: Arc<dyn ObjectStore>,
    handle: UploadHandle,
}

impl PartUploader {
    pub fn new(store: Arc<dyn ObjectStore>, handle: UploadHandle) -> Self {
        Self { store, handle }
    }

    /// Upload `chunk` as part `chunk.index + 1`
    pub async fn upload(&self, chunk: Chunk) -> Result<CompletedPart> {
        let part_number = chunk.part_number();
        let part_number = u32::try_from(part_number)
            .ok()
            .filter(|n| *n <= MAX_PARTS)
            .ok_or(UploadError::TooManyParts {
                part_number,
                max: MAX_PARTS,
            })?;

        let len = chunk.len();
        let e_tag = self
            .store
            .upload_part(&self.handle, part_number, chunk.bytes)
            .await
            .map_err(|source| UploadError::PartUpload {
                upload_id: self.handle.upload_id.clone(),
                part_number,
                source,
            })?;

        tracing::debug!(
            upload_id = %self.handle.upload_id,
            key = %self.handle.key,
            part_number = part_number,
            bytes = len,
            "Uploaded part"
        );

        Ok(CompletedPart { part_number, e_tag })
    }
}
