//! Upload error types.

use std::fmt;
use std::time::Duration;

use notedrop_transfer::TransferError;

use crate::resume_store::StoreError;

/// How a remote store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The call did not finish within its deadline.
    Timeout,
    /// The connection was refused, reset or aborted.
    ConnectionAborted,
    /// Any other transport-level failure.
    Network,
    /// 5xx response other than 507.
    ServerError(u16),
    /// The backend no longer knows the session (unknown or expired).
    SessionNotFound,
    /// The backend recomputed a different digest for the chunk.
    HashMismatch,
    /// The destination is out of space.
    InsufficientStorage,
    /// The request was refused for any other reason.
    Rejected(u16),
    /// A success response that could not be decoded.
    InvalidResponse,
}

impl RemoteErrorKind {
    /// Transient transport failures are retried; protocol answers are not.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionAborted | Self::Network | Self::ServerError(_)
        )
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::ConnectionAborted => f.write_str("connection aborted"),
            Self::Network => f.write_str("network error"),
            Self::ServerError(status) => write!(f, "server error {status}"),
            Self::SessionNotFound => f.write_str("session not found"),
            Self::HashMismatch => f.write_str("hash mismatch"),
            Self::InsufficientStorage => f.write_str("insufficient storage"),
            Self::Rejected(status) => write!(f, "rejected with status {status}"),
            Self::InvalidResponse => f.write_str("invalid response"),
        }
    }
}

/// A failed call to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error for a call that exceeded `limit`.
    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            RemoteErrorKind::Timeout,
            format!("no response within {}s", limit.as_secs_f64()),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// A chunk that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chunk {chunk_index} failed after {attempts} attempt(s): {error}")]
pub struct ChunkFailure {
    pub chunk_index: u32,
    /// Upload attempts made, including the first.
    pub attempts: u32,
    pub error: RemoteError,
}

/// Why a single chunk upload gave up.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// The chunk could not be read from the source. Never retried.
    #[error("cannot read chunk {chunk_index}: {source}")]
    Integrity {
        chunk_index: u32,
        #[source]
        source: TransferError,
    },

    /// The remote refused the chunk or retries were exhausted.
    #[error(transparent)]
    Remote(ChunkFailure),
}

/// Errors produced while driving an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("invalid uploader config: {0}")]
    InvalidConfig(String),

    #[error("integrity error on chunk {chunk_index}: {source}")]
    Integrity {
        chunk_index: u32,
        #[source]
        source: TransferError,
    },

    #[error("source unavailable, cannot resume: {0}")]
    SourceUnavailable(String),

    #[error("init failed: {0}")]
    Init(RemoteError),

    #[error(
        "{} chunk(s) failed in session {session_id}: {}",
        .failures.len(),
        describe_failures(.failures)
    )]
    ChunksFailed {
        session_id: String,
        failures: Vec<ChunkFailure>,
    },

    #[error("session {0} not found or expired on the backend")]
    SessionExpired(String),

    #[error("insufficient storage at destination: {0}")]
    InsufficientStorage(String),

    #[error("session {0} is already being driven")]
    SessionBusy(String),

    #[error("cancelled")]
    Cancelled,

    #[error("no resume state for session {0}")]
    NoResumeState(String),

    #[error("only {uploaded} of {total} chunks acknowledged")]
    IncompleteChunks { uploaded: u32, total: u32 },

    #[error("completion failed: {0}")]
    Completion(RemoteError),

    #[error("progress query failed: {0}")]
    Progress(RemoteError),

    #[error("cancel request failed: {0}")]
    CancelRequest(RemoteError),

    #[error("resume store error: {0}")]
    Persist(#[from] StoreError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::SourceUnavailable(msg) => Self::SourceUnavailable(msg),
            other => Self::Transfer(other),
        }
    }
}

impl UploadError {
    /// Whether the persisted resume record stays valid after this error.
    ///
    /// Transient exhaustion, interrupted completion and a source that can be
    /// restored keep the record; protocol rejections, expiry and
    /// cancellation drop it.
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::ChunksFailed { failures, .. } => failures.iter().all(|f| f.error.is_retryable()),
            Self::Completion(e) | Self::Progress(e) => e.is_retryable(),
            Self::Integrity { .. } | Self::SourceUnavailable(_) => true,
            _ => false,
        }
    }

    /// Chunk indices this error is about, if any.
    pub fn failed_chunks(&self) -> Vec<u32> {
        match self {
            Self::ChunksFailed { failures, .. } => failures.iter().map(|f| f.chunk_index).collect(),
            Self::Integrity { chunk_index, .. } => vec![*chunk_index],
            _ => Vec::new(),
        }
    }
}

fn describe_failures(failures: &[ChunkFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("chunk {} ({})", f.chunk_index, f.error.kind))
        .collect::<Vec<_>>()
        .join(", ")
}
