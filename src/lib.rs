//! S3 Sink
//!
//! Streams byte sources of unknown length into S3-compatible object stores
//! using multipart uploads. The remote object is either fully assembled or
//! the upload is aborted; a write never reports partial success.
//!
//! # Modules
//!
//! - `upload`: chunking, part upload, session lifecycle and finalization
//! - `storage`: the `ObjectStore` seam with S3 and in-memory backends
//! - `sink`: path-to-key mapping and the `write` entry point
//! - `config`: environment and JSON configuration
//!
//! A completion call that fails leaves its multipart upload open on the
//! store. Buckets should carry a lifecycle rule that expires incomplete
//! multipart uploads.

pub mod config;
pub mod error;
pub mod sink;
pub mod storage;
pub mod upload;

pub use config::{Config, StorageConfig, StorageProvider, UploadConfig};
pub use error::{ConfigError, Result, StorageError, UploadError};
pub use sink::S3Sink;
pub use storage::{MemoryStore, ObjectStore, S3Client};
pub use upload::{Disposition, UploadSession, UploadSummary};
