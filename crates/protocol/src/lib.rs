//! Wire protocol for resumable chunked uploads.
//!
//! A conforming storage backend speaks five operations: init, upload
//! chunk, query progress, complete and cancel. This crate holds their
//! payloads, the shared status enum and the protocol-level constants.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use envelope::{ErrorBody, ErrorCode};
pub use types::{ArtifactRef, UploadMetadata, UploadStatus};
