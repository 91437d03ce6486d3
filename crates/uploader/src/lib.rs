//! Resumable, integrity-checked chunked uploads.
//!
//! This crate implements the **upload logic** against an abstract
//! [`RemoteStore`]; it has no HTTP dependency. `notedrop-store-client`
//! provides the HTTP implementation.
//!
//! # Pipeline
//!
//! 1. **Plan**: hash the file and split it into fixed-size chunks
//! 2. **Init**: open a session on the backend and persist a resume record
//! 3. **Upload**: send missing chunks in bounded batches with retry
//! 4. **Complete**: ask the backend to assemble and verify the file
//!
//! A session interrupted anywhere before completion can be picked up with
//! [`Uploader::resume`], which asks the backend which chunks it still lacks.

mod completion;
pub mod config;
pub mod error;
mod events;
pub mod orchestrator;
pub mod registry;
pub mod remote;
mod resume;
pub mod resume_store;
mod scheduler;
mod transport;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use config::UploaderConfig;
pub use error::{ChunkError, ChunkFailure, RemoteError, RemoteErrorKind, UploadError};
pub use orchestrator::Uploader;
pub use registry::{SessionLease, SessionRegistry};
pub use remote::{RemoteFuture, RemoteStore};
pub use resume_store::{ResumeRecord, ResumeStore, StoreError, default_state_path};
pub use transport::RetryPolicy;
pub use types::{
    CancelOutcome, ResumeInfo, UploadEvent, UploadOutcome, UploadProgress, UploadRequest,
    guess_content_type,
};
