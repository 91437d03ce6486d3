//! Chunk planning, content hashing and upload session state.
//!
//! Everything here is synchronous and free of network I/O; the uploader
//! crate drives it from async tasks (file reads go through
//! `spawn_blocking`).

mod chunked;
mod plan;
mod progress;
mod types;
mod validation;

use notedrop_protocol::UploadStatus;

pub use chunked::{ChunkSource, calculate_file_checksum, checksum_bytes};
pub use notedrop_protocol::constants::DEFAULT_CHUNK_SIZE;
pub use plan::{ChunkPlan, ChunkRange};
pub use progress::{ChunkProgress, SpeedCalculator};
pub use types::{Chunk, FileDescriptor, UploadSession};
pub use validation::validate_file_name;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk plan: {0}")]
    InvalidPlan(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),
}
