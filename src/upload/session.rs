//! Upload Session
//!
//! Drives one multipart upload from the first byte to the terminal call:
//! - Start: the multipart upload is created once the first chunk exists
//! - Stream: chunks are uploaded in order and their parts collected
//! - Finalize: exactly one of complete or abort is issued
//!
//! A source that ends without yielding any bytes never starts a multipart
//! upload; a zero-byte object is written with a single put instead.
//!
//! Cancellation is any future passed to [`UploadSession::run`]. If the run
//! future itself is dropped while parts are in flight, an abort is spawned
//! on the current runtime. Once the terminal call has been issued, dropping
//! the future spawns nothing.

use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, Stream, StreamExt};

use super::chunker::chunked;
use super::finalizer::LifecycleFinalizer;
use super::part_uploader::PartUploader;
use super::types::{
    CompletedPart, Disposition, SessionStatus, UploadHandle, UploadOutcome, UploadSummary,
};
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::storage::ObjectStore;

// ============================================================================
// Session
// ============================================================================

/// One streaming multipart upload to `bucket/key`
pub struct UploadSession {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    config: UploadConfig,
    status: SessionStatus,
    handle: Option<UploadHandle>,
    parts: Vec<CompletedPart>,
    bytes: u64,
}

impl UploadSession {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            config,
            status: SessionStatus::NotStarted,
            handle: None,
            parts: Vec::new(),
            bytes: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The multipart upload, once the store has created it
    pub fn handle(&self) -> Option<&UploadHandle> {
        self.handle.as_ref()
    }

    /// Parts acknowledged so far, ordered by part number
    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    /// Upload everything `source` yields, stopping early if `cancel` resolves
    ///
    /// Returns `Disposition::Canceled` rather than an error when canceled.
    /// A session runs at most once.
    pub async fn run<S, C>(&mut self, source: S, cancel: C) -> Result<UploadSummary>
    where
        S: Stream<Item = io::Result<Bytes>>,
        C: Future<Output = ()>,
    {
        if self.status != SessionStatus::NotStarted {
            return Err(UploadError::SessionFinished(self.status));
        }

        let started_at = Utc::now();
        let mut cancel = std::pin::pin!(cancel);
        let mut chunks = Box::pin(chunked(source, self.config.min_part_size));

        let first = tokio::select! {
            biased;
            _ = &mut cancel => {
                tracing::info!(key = %self.key, "Upload canceled before any data arrived");
                self.transition(SessionStatus::Aborted);
                return Ok(self.summary(Disposition::Canceled, started_at));
            }
            first = chunks.next() => first,
        };

        let first = match first {
            None => return self.write_empty(started_at).await,
            Some(Err(e)) => {
                self.transition(SessionStatus::Failed);
                return Err(e);
            }
            Some(Ok(chunk)) => chunk,
        };

        let handle = self.start().await?;
        let mut guard = AbortOnDrop::arm(self.store.clone(), handle.clone());
        self.transition(SessionStatus::Streaming);

        let uploader = PartUploader::new(self.store.clone(), handle.clone());
        let mut uploads = Box::pin(
            stream::once(future::ready(Ok(first)))
                .chain(chunks)
                .map(move |chunk| {
                    let uploader = uploader.clone();
                    async move {
                        let chunk = chunk?;
                        let len = chunk.len();
                        uploader.upload(chunk).await.map(|part| (part, len))
                    }
                })
                .buffered(self.config.max_concurrent_parts.max(1)),
        );

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut cancel => break UploadOutcome::Canceled,
                next = uploads.next() => match next {
                    Some(Ok((part, len))) => self.record(part, len),
                    Some(Err(e)) => break UploadOutcome::Failed(e),
                    None => break UploadOutcome::Completed,
                },
            }
        };
        // In-flight part uploads are dropped before the terminal call
        drop(uploads);

        tracing::debug!(
            upload_id = %handle.upload_id,
            outcome = outcome.name(),
            parts = self.parts.len(),
            "Streaming finished"
        );

        // The finalizer owns the single terminal call from here on; a drop
        // during complete or abort must not issue a second one.
        guard.disarm();
        self.transition(match outcome {
            UploadOutcome::Completed => SessionStatus::Completing,
            _ => SessionStatus::Aborting,
        });

        let result = LifecycleFinalizer::new(self.store.as_ref(), &handle)
            .finalize(outcome, &self.parts)
            .await;

        match result {
            Ok(disposition) => {
                self.transition(match disposition {
                    Disposition::Completed => SessionStatus::Completed,
                    Disposition::Canceled => SessionStatus::Aborted,
                });
                let summary = self.summary(disposition, started_at);
                tracing::info!(
                    upload_id = %handle.upload_id,
                    key = %self.key,
                    disposition = ?summary.disposition,
                    parts = summary.parts,
                    bytes = summary.bytes,
                    elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
                    "Upload session finished"
                );
                Ok(summary)
            }
            Err(e) => {
                self.transition(SessionStatus::Failed);
                Err(e)
            }
        }
    }

    async fn start(&mut self) -> Result<UploadHandle> {
        match self
            .store
            .create_multipart_upload(&self.bucket, &self.key)
            .await
        {
            Ok(upload_id) => {
                let handle = UploadHandle::new(upload_id, self.bucket.clone(), self.key.clone());
                tracing::info!(
                    upload_id = %handle.upload_id,
                    bucket = %handle.bucket,
                    key = %handle.key,
                    part_size = self.config.min_part_size,
                    "Started multipart upload"
                );
                self.handle = Some(handle.clone());
                self.transition(SessionStatus::Started);
                Ok(handle)
            }
            Err(source) => {
                self.transition(SessionStatus::Failed);
                Err(UploadError::Start {
                    key: self.key.clone(),
                    source,
                })
            }
        }
    }

    async fn write_empty(&mut self, started_at: DateTime<Utc>) -> Result<UploadSummary> {
        if let Err(source) = self
            .store
            .put_object(&self.bucket, &self.key, Bytes::new())
            .await
        {
            self.transition(SessionStatus::Failed);
            return Err(UploadError::EmptyObject {
                key: self.key.clone(),
                source,
            });
        }

        tracing::info!(key = %self.key, "Source was empty, wrote zero-byte object");
        self.transition(SessionStatus::Completed);
        Ok(self.summary(Disposition::Completed, started_at))
    }

    fn record(&mut self, part: CompletedPart, len: usize) {
        debug_assert_eq!(part.part_number as usize, self.parts.len() + 1);
        self.bytes += len as u64;
        self.parts.push(part);
    }

    fn transition(&mut self, next: SessionStatus) {
        tracing::debug!(key = %self.key, from = ?self.status, to = ?next, "Session state change");
        self.status = next;
    }

    fn summary(&self, disposition: Disposition, started_at: DateTime<Utc>) -> UploadSummary {
        UploadSummary {
            key: self.key.clone(),
            upload_id: self.handle.as_ref().map(|h| h.upload_id.clone()),
            disposition,
            parts: self.parts.len(),
            bytes: self.bytes,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

// ============================================================================
// Drop Guard
// ============================================================================

/// Aborts a started upload if the session future is dropped mid-stream
struct AbortOnDrop {
    store: Arc<dyn ObjectStore>,
    handle: Option<UploadHandle>,
}

impl AbortOnDrop {
    fn arm(store: Arc<dyn ObjectStore>, handle: UploadHandle) -> Self {
        Self {
            store,
            handle: Some(handle),
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                runtime.spawn(async move {
                    match store.abort_multipart_upload(&handle).await {
                        Ok(()) => tracing::info!(
                            upload_id = %handle.upload_id,
                            key = %handle.key,
                            "Aborted multipart upload of dropped session"
                        ),
                        Err(e) => tracing::warn!(
                            upload_id = %handle.upload_id,
                            key = %handle.key,
                            "Failed to abort multipart upload of dropped session: {}",
                            e
                        ),
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    upload_id = %handle.upload_id,
                    key = %handle.key,
                    "Session dropped outside a runtime, multipart upload left open"
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{MemoryStore, StoreCall};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Memory store that can hold part uploads forever or answer aborts late
    struct SlowStore {
        inner: MemoryStore,
        hold_parts: bool,
        abort_delay: Duration,
        part_attempts: Arc<AtomicUsize>,
    }

    impl SlowStore {
        fn new(inner: &MemoryStore) -> Self {
            Self {
                inner: inner.clone(),
                hold_parts: false,
                abort_delay: Duration::ZERO,
                part_attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn create_multipart_upload(
            &self,
            bucket: &str,
            key: &str,
        ) -> std::result::Result<String, StorageError> {
            self.inner.create_multipart_upload(bucket, key).await
        }

        async fn upload_part(
            &self,
            handle: &UploadHandle,
            part_number: u32,
            body: Bytes,
        ) -> std::result::Result<String, StorageError> {
            self.part_attempts.fetch_add(1, Ordering::SeqCst);
            if self.hold_parts {
                future::pending::<()>().await;
            }
            self.inner.upload_part(handle, part_number, body).await
        }

        async fn complete_multipart_upload(
            &self,
            handle: &UploadHandle,
            parts: &[CompletedPart],
        ) -> std::result::Result<(), StorageError> {
            self.inner.complete_multipart_upload(handle, parts).await
        }

        async fn abort_multipart_upload(
            &self,
            handle: &UploadHandle,
        ) -> std::result::Result<(), StorageError> {
            let result = self.inner.abort_multipart_upload(handle).await;
            tokio::time::sleep(self.abort_delay).await;
            result
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
        ) -> std::result::Result<(), StorageError> {
            self.inner.put_object(bucket, key, body).await
        }
    }

    fn config(part_size: usize) -> UploadConfig {
        UploadConfig {
            min_part_size: part_size,
            max_concurrent_parts: 1,
        }
    }

    fn source(data: &[u8], fragment: usize) -> impl Stream<Item = io::Result<Bytes>> {
        let buffers: Vec<io::Result<Bytes>> = data
            .chunks(fragment)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(buffers)
    }

    fn session(store: &MemoryStore, part_size: usize) -> UploadSession {
        UploadSession::new(Arc::new(store.clone()), "bucket", "exports/table.csv", config(part_size))
    }

    #[tokio::test]
    async fn test_completes_with_ordered_parts() {
        let store = MemoryStore::new();
        let data: Vec<u8> = (0..100u8).collect();
        let mut session = session(&store, 30);

        let summary = session
            .run(source(&data, 7), future::pending())
            .await
            .unwrap();

        assert_eq!(summary.disposition, Disposition::Completed);
        assert_eq!(summary.parts, 4);
        assert_eq!(summary.bytes, 100);
        assert_eq!(session.status(), SessionStatus::Completed);

        let numbers: Vec<u32> = session.parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(
            store.object("bucket", "exports/table.csv").unwrap().to_vec(),
            data
        );
        assert_eq!(store.count_completes(), 1);
        assert_eq!(store.count_aborts(), 0);
    }

    #[tokio::test]
    async fn test_empty_source_writes_zero_byte_object() {
        let store = MemoryStore::new();
        let mut session = session(&store, 30);

        let summary = session
            .run(source(&[], 1), future::pending())
            .await
            .unwrap();

        assert_eq!(summary.disposition, Disposition::Completed);
        assert_eq!(summary.upload_id, None);
        assert_eq!(summary.parts, 0);
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(
            store.calls(),
            vec![StoreCall::Put {
                bucket: "bucket".to_string(),
                key: "exports/table.csv".to_string(),
                len: 0,
            }]
        );
        assert!(store.object("bucket", "exports/table.csv").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_needs_no_cleanup() {
        let store = MemoryStore::new().fail_create();
        let mut session = session(&store, 4);

        let err = session
            .run(source(b"abcdefgh", 3), future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Start { .. }));
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(session.handle().is_none());
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_and_reports_original_error() {
        let store = MemoryStore::new().fail_part(3).fail_abort();
        let mut session = session(&store, 4);

        let err = session
            .run(source(&[7u8; 20], 5), future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::PartUpload { part_number: 3, .. }));
        assert_eq!(session.status(), SessionStatus::Failed);
        assert_eq!(session.parts().len(), 2);

        let upload_id = session.handle().unwrap().upload_id.clone();
        assert_eq!(store.uploaded_parts(&upload_id), 2);
        assert_eq!(store.count_aborts(), 1);
        assert_eq!(store.count_completes(), 0);
    }

    #[tokio::test]
    async fn test_source_error_after_start_aborts() {
        let store = MemoryStore::new();
        let mut session = session(&store, 4);
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad row")),
        ]);

        let err = session.run(broken, future::pending()).await.unwrap_err();

        assert!(matches!(err, UploadError::Source(_)));
        assert_eq!(store.count_aborts(), 1);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_source_error_before_start_touches_nothing() {
        let store = MemoryStore::new();
        let mut session = session(&store, 4);
        let broken = stream::iter(vec![Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad header",
        ))]);

        let err = session.run(broken, future::pending()).await.unwrap_err();

        assert!(matches!(err, UploadError::Source(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_parts_aborts_without_error() {
        let store = MemoryStore::new();
        let mut session = session(&store, 4);
        // Two full parts, then the source stalls
        let stalled = source(&[1u8; 8], 2).chain(stream::pending());

        let summary = session
            .run(stalled, tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();

        assert_eq!(summary.disposition, Disposition::Canceled);
        assert_eq!(summary.parts, 2);
        assert_eq!(session.status(), SessionStatus::Aborted);

        let upload_id = session.handle().unwrap().upload_id.clone();
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::Abort { upload_id })
        );
        assert_eq!(store.count_completes(), 0);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_data_creates_nothing() {
        let store = MemoryStore::new();
        let mut session = session(&store, 4);

        let summary = session
            .run(stream::pending(), future::ready(()))
            .await
            .unwrap();

        assert_eq!(summary.disposition, Disposition::Canceled);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_spawns_abort() {
        let store = MemoryStore::new();
        let mut session = session(&store, 4);
        let stalled = source(&[1u8; 4], 4).chain(stream::pending());

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            session.run(stalled, future::pending()),
        )
        .await;
        assert!(result.is_err());

        for _ in 0..100 {
            if store.count_aborts() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.count_aborts(), 1);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_drop_during_abort_issues_single_abort() {
        let inner = MemoryStore::new();
        let store = SlowStore {
            abort_delay: Duration::from_millis(200),
            ..SlowStore::new(&inner)
        };
        let mut session =
            UploadSession::new(Arc::new(store), "bucket", "exports/table.csv", config(4));
        let stalled = source(&[1u8; 8], 4).chain(stream::pending());

        // Canceled at 10ms, dropped at 50ms while the abort is still answering
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            session.run(stalled, tokio::time::sleep(Duration::from_millis(10))),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(session.status(), SessionStatus::Aborting);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(inner.count_aborts(), 1);
        assert_eq!(inner.count_completes(), 0);
        assert_eq!(inner.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_first_part_pending() {
        let inner = MemoryStore::new();
        let store = SlowStore {
            hold_parts: true,
            ..SlowStore::new(&inner)
        };
        let attempts = store.part_attempts.clone();
        let mut session =
            UploadSession::new(Arc::new(store), "bucket", "exports/table.csv", config(4));

        let summary = session
            .run(
                source(&[2u8; 12], 4),
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert_eq!(summary.disposition, Disposition::Canceled);
        assert_eq!(summary.parts, 0);
        assert_eq!(summary.bytes, 0);
        assert_eq!(session.status(), SessionStatus::Aborted);

        let upload_id = session.handle().unwrap().upload_id.clone();
        let expected = vec![
            StoreCall::Create {
                bucket: "bucket".to_string(),
                key: "exports/table.csv".to_string(),
            },
            StoreCall::Abort { upload_id },
        ];
        assert_eq!(inner.calls(), expected);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // Nothing is uploaded once the session has returned
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(inner.calls(), expected);
    }

    #[tokio::test]
    async fn test_concurrent_parts_stay_ordered() {
        let store = MemoryStore::new();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut session = UploadSession::new(
            Arc::new(store.clone()),
            "bucket",
            "big.bin",
            UploadConfig {
                min_part_size: 64,
                max_concurrent_parts: 4,
            },
        );

        let summary = session
            .run(source(&data, 100), future::pending())
            .await
            .unwrap();

        assert_eq!(summary.parts, 16);
        let numbers: Vec<u32> = session.parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, (1..=16).collect::<Vec<u32>>());
        assert_eq!(store.object("bucket", "big.bin").unwrap().to_vec(), data);
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let store = MemoryStore::new();
        let mut session = session(&store, 4);
        session
            .run(source(b"abc", 3), future::pending())
            .await
            .unwrap();

        let err = session
            .run(source(b"abc", 3), future::pending())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::SessionFinished(SessionStatus::Completed)
        ));
    }
}
