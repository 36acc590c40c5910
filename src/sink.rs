//! Destination-facing sink
//!
//! Maps a destination path onto an object key and runs one
//! [`UploadSession`] per write.

use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;

use crate::config::{Config, UploadConfig};
use crate::error::Result;
use crate::storage::ObjectStore;
use crate::upload::{UploadSession, UploadSummary};

/// Writes byte streams as objects of one bucket
#[derive(Clone)]
pub struct S3Sink {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: Option<String>,
    upload: UploadConfig,
}

impl S3Sink {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, upload: UploadConfig) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key_prefix: None,
            upload,
        }
    }

    /// Create a sink for the bucket, prefix and part settings of `config`
    pub fn from_config(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        Self {
            store,
            bucket: config.storage.bucket.clone(),
            key_prefix: config.storage.key_prefix.clone(),
            upload: config.upload,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write `source` to `path`
    ///
    /// Succeeds only once the object is fully assembled. On failure the
    /// multipart upload has already been aborted (best effort).
    pub async fn write<S>(&self, path: &str, source: S) -> Result<()>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.write_until(path, source, std::future::pending()).await?;
        Ok(())
    }

    /// Write `source` to `path`, aborting the upload if `cancel` resolves first
    pub async fn write_until<S, C>(&self, path: &str, source: S, cancel: C) -> Result<UploadSummary>
    where
        S: Stream<Item = io::Result<Bytes>>,
        C: Future<Output = ()>,
    {
        let key = self.object_key(path);
        let mut session =
            UploadSession::new(self.store.clone(), self.bucket.clone(), key, self.upload);
        session.run(source, cancel).await
    }

    /// Object key for a destination path
    pub fn object_key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match self.key_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, path),
            _ => path.to_string(),
        }
    }
}
