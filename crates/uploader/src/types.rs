//! Data types for the upload flow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notedrop_protocol::{ArtifactRef, UploadMetadata, UploadStatus};

use crate::resume_store::ResumeRecord;

/// A file to upload and the parameters it is registered with.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub source_path: PathBuf,
    /// Name the backend stores the file under. Defaults to the source's
    /// final path component.
    pub file_name: Option<String>,
    /// Defaults to a guess from the file extension.
    pub content_type: Option<String>,
    pub metadata: UploadMetadata,
    /// Opaque destination handle passed through to completion.
    pub destination_token: Option<String>,
}

impl UploadRequest {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            ..Default::default()
        }
    }
}

/// Result of a session that reached `completed`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub session_id: String,
    pub artifact: ArtifactRef,
    /// `true` when the session was resumed rather than initialized.
    pub resumed: bool,
    /// Chunks sent during this run (excludes chunks acknowledged earlier).
    pub chunks_sent: u32,
    pub total_chunks: u32,
}

/// Progress snapshot emitted after every acknowledged chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub session_id: String,
    /// Completion percentage (0-100).
    pub percent: f64,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    /// The chunk whose acknowledgement triggered this snapshot.
    pub current_chunk_index: u32,
    pub bytes_uploaded: u64,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

/// Event emitted while driving a session.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// A session was initialized or resumed.
    Started {
        session_id: String,
        file_name: String,
        total_chunks: u32,
        resumed: bool,
    },
    /// The session moved to a new lifecycle state.
    StatusChanged {
        session_id: String,
        status: UploadStatus,
    },
    /// A chunk was acknowledged.
    Progress(UploadProgress),
    /// A chunk attempt failed transiently and will be retried after `delay`.
    ChunkRetry {
        session_id: String,
        chunk_index: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The backend assembled and verified the file.
    Completed {
        session_id: String,
        artifact: ArtifactRef,
    },
    /// The session failed.
    Failed {
        session_id: String,
        error: String,
        failed_chunks: Vec<u32>,
        /// Whether the resume record was kept.
        resumable: bool,
    },
    /// The session was cancelled.
    Cancelled { session_id: String },
}

impl UploadEvent {
    /// Session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. }
            | Self::StatusChanged { session_id, .. }
            | Self::ChunkRetry { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::Cancelled { session_id } => session_id,
            Self::Progress(p) => &p.session_id,
        }
    }
}

/// Answer to "can this session be resumed?".
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeInfo {
    pub record: ResumeRecord,
    /// Chunks the backend still lacks, in order. Empty when the backend
    /// could not be asked.
    pub missing_chunks: Vec<u32>,
    pub uploaded_chunk_count: u32,
    /// Another task is currently driving the session.
    pub active: bool,
    pub resumable: bool,
    /// Why resume is not possible, when `resumable` is false.
    pub reason: Option<String>,
}

/// What [`Uploader::cancel`](crate::Uploader::cancel) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The session is being driven; its driver stops after the current batch.
    Signalled,
    /// The session was idle; its record was dropped and the backend told.
    Released { remote_released: bool },
}

/// Guesses a MIME type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
