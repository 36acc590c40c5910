//! In-memory object store
//!
//! Mirrors the S3 multipart contract closely enough to exercise the full
//! upload lifecycle without a network:
//! - Completion requires the exact set of uploaded parts with matching ETags
//! - Completion with an empty part list is rejected
//! - Aborting discards every uploaded part
//!
//! Every call is recorded, and individual calls can be made to fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::ObjectStore;
use crate::error::StorageError;
use crate::upload::{CompletedPart, UploadHandle};

/// A store call, as observed by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create { bucket: String, key: String },
    UploadPart { upload_id: String, part_number: u32, len: usize },
    Complete { upload_id: String, part_numbers: Vec<u32> },
    Abort { upload_id: String },
    Put { bucket: String, key: String, len: usize },
}

#[derive(Default)]
struct Faults {
    create: bool,
    part: Option<u32>,
    complete: bool,
    abort: bool,
}

struct PendingUpload {
    bucket: String,
    key: String,
    /// part number -> (etag, body)
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<(String, String), Bytes>,
    uploads: HashMap<String, PendingUpload>,
    calls: Vec<StoreCall>,
    faults: Faults,
}

/// Object store held entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every create-multipart-upload call
    pub fn fail_create(self) -> Self {
        self.inner.lock().faults.create = true;
        self
    }

    /// Reject the upload of `part_number`
    pub fn fail_part(self, part_number: u32) -> Self {
        self.inner.lock().faults.part = Some(part_number);
        self
    }

    /// Reject every complete-multipart-upload call
    pub fn fail_complete(self) -> Self {
        self.inner.lock().faults.complete = true;
        self
    }

    /// Reject every abort-multipart-upload call
    pub fn fail_abort(self) -> Self {
        self.inner.lock().faults.abort = true;
        self
    }

    /// Get a stored object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All calls received so far, in order
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    /// Multipart uploads that were neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.inner.lock().uploads.len()
    }

    /// Number of parts currently held for `upload_id`
    pub fn uploaded_parts(&self, upload_id: &str) -> usize {
        self.inner
            .lock()
            .uploads
            .get(upload_id)
            .map(|upload| upload.parts.len())
            .unwrap_or(0)
    }

    pub fn count_completes(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Complete { .. }))
    }

    pub fn count_aborts(&self) -> usize {
        self.count(|call| matches!(call, StoreCall::Abort { .. }))
    }

    fn count(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

/// Quoted hex SHA-256 of `data`, in the shape S3 returns ETags
fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

fn upload_mismatch(upload: &PendingUpload, handle: &UploadHandle) -> bool {
    upload.bucket != handle.bucket || upload.key != handle.key
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, StorageError> {
        let mut state = self.inner.lock();
        state.calls.push(StoreCall::Create {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });

        if state.faults.create {
            return Err(StorageError::AccessDenied(format!("{}/{}", bucket, key)));
        }

        let upload_id = Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        handle: &UploadHandle,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let mut state = self.inner.lock();
        state.calls.push(StoreCall::UploadPart {
            upload_id: handle.upload_id.clone(),
            part_number,
            len: body.len(),
        });

        if state.faults.part == Some(part_number) {
            return Err(StorageError::SdkError(format!(
                "Injected failure for part {}",
                part_number
            )));
        }

        let upload = state
            .uploads
            .get_mut(&handle.upload_id)
            .filter(|upload| !upload_mismatch(upload, handle))
            .ok_or_else(|| StorageError::UploadNotFound(handle.upload_id.clone()))?;

        let etag = compute_etag(&body);
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        handle: &UploadHandle,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        state.calls.push(StoreCall::Complete {
            upload_id: handle.upload_id.clone(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });

        if state.faults.complete {
            return Err(StorageError::SdkError("Injected completion failure".to_string()));
        }

        let upload = state
            .uploads
            .get(&handle.upload_id)
            .filter(|upload| !upload_mismatch(upload, handle))
            .ok_or_else(|| StorageError::UploadNotFound(handle.upload_id.clone()))?;

        if parts.is_empty() {
            return Err(StorageError::InvalidPart(
                "Completion requires at least one part".to_string(),
            ));
        }

        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StorageError::InvalidPart(
                "Parts must be in strictly ascending order".to_string(),
            ));
        }

        if parts.len() != upload.parts.len() {
            return Err(StorageError::InvalidPart(format!(
                "Expected {} parts, got {}",
                upload.parts.len(),
                parts.len()
            )));
        }

        let mut assembled = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, body)) if *etag == part.e_tag => assembled.extend_from_slice(body),
                _ => {
                    return Err(StorageError::InvalidPart(format!(
                        "Part {} does not match an uploaded part",
                        part.part_number
                    )))
                }
            }
        }

        state.uploads.remove(&handle.upload_id);
        state.objects.insert(
            (handle.bucket.clone(), handle.key.clone()),
            assembled.freeze(),
        );

        Ok(())
    }

    async fn abort_multipart_upload(&self, handle: &UploadHandle) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        state.calls.push(StoreCall::Abort {
            upload_id: handle.upload_id.clone(),
        });

        if state.faults.abort {
            return Err(StorageError::ConnectionFailed("Injected abort failure".to_string()));
        }

        state
            .uploads
            .remove(&handle.upload_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::UploadNotFound(handle.upload_id.clone()))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        state.calls.push(StoreCall::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            len: body.len(),
        });

        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}
