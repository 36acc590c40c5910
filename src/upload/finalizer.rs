//! Lifecycle Finalizer
//!
//! Issues the single terminal call of a started multipart upload:
//! - `Completed` → complete; its failure is surfaced and nothing else is tried
//! - `Canceled` → abort; the abort result is logged, never surfaced
//! - `Failed` → abort, then the original error is surfaced
//!
//! A failed completion leaves the upload dangling on the store. Buckets
//! written through this crate should carry a lifecycle rule that expires
//! incomplete multipart uploads.

use super::types::{CompletedPart, Disposition, UploadHandle, UploadOutcome};
use crate::error::{Result, UploadError};
use crate::storage::ObjectStore;

/// Terminates one started multipart upload
pub struct LifecycleFinalizer<'a> {
    store: &'a dyn ObjectStore,
    handle: &'a UploadHandle,
}

impl<'a> LifecycleFinalizer<'a> {
    pub fn new(store: &'a dyn ObjectStore, handle: &'a UploadHandle) -> Self {
        Self { store, handle }
    }

    /// Complete or abort according to `outcome`
    ///
    /// `parts` must be ordered by part number.
    pub async fn finalize(
        &self,
        outcome: UploadOutcome,
        parts: &[CompletedPart],
    ) -> Result<Disposition> {
        match outcome {
            UploadOutcome::Completed => {
                self.store
                    .complete_multipart_upload(self.handle, parts)
                    .await
                    .map_err(|source| UploadError::Completion {
                        upload_id: self.handle.upload_id.clone(),
                        source,
                    })?;

                tracing::info!(
                    upload_id = %self.handle.upload_id,
                    key = %self.handle.key,
                    parts = parts.len(),
                    "Completed multipart upload"
                );
                Ok(Disposition::Completed)
            }
            UploadOutcome::Canceled => {
                self.abort().await;
                tracing::info!(
                    upload_id = %self.handle.upload_id,
                    key = %self.handle.key,
                    parts = parts.len(),
                    "Multipart upload canceled"
                );
                Ok(Disposition::Canceled)
            }
            UploadOutcome::Failed(error) => {
                self.abort().await;
                Err(error)
            }
        }
    }

    /// Best-effort abort; failures are logged only
    async fn abort(&self) {
        match self.store.abort_multipart_upload(self.handle).await {
            Ok(()) => {
                tracing::info!(
                    upload_id = %self.handle.upload_id,
                    key = %self.handle.key,
                    "Aborted multipart upload"
                );
            }
            Err(source) => {
                let error = UploadError::Abort {
                    upload_id: self.handle.upload_id.clone(),
                    source,
                };
                tracing::warn!(key = %self.handle.key, "{}", error);
            }
        }
    }
}
