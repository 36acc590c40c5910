//! Streaming Multipart Upload Module
//!
//! Delivers a byte stream of unknown length to an object store with:
//! - Fixed-size part assembly with bounded buffering
//! - 1-based, gapless part numbering in arrival order
//! - Exactly one terminal call (complete or abort) per started upload
//!
//! Flow:
//! 1. The chunker cuts the source into indexed chunks
//! 2. The part uploader turns each chunk into an acknowledged part
//! 3. The session collects parts in order and owns the upload id
//! 4. The finalizer completes or aborts based on how streaming ended

pub mod chunker;
pub mod finalizer;
pub mod part_uploader;
pub mod session;
pub mod source;
pub mod types;

pub use chunker::chunked;
pub use finalizer::LifecycleFinalizer;
pub use part_uploader::PartUploader;
pub use session::UploadSession;
pub use source::{reader_stream, DEFAULT_READ_SIZE};
pub use types::*;
