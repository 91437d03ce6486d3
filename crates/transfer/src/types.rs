use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use notedrop_protocol::UploadStatus;
use tracing::debug;

use crate::TransferError;
use crate::plan::ChunkPlan;
use crate::progress::ChunkProgress;

/// One chunk read from the source, ready to send.
///
/// Never persisted; rebuilt (and rehashed) for every upload attempt.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the plan.
    pub index: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex digest of `data`.
    pub hash: String,
}

/// Immutable description of the file behind a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    /// SHA-256 hex digest of the whole file.
    pub file_hash: String,
}

/// State of one in-flight transfer.
///
/// Owned by a single orchestrating task; nothing in here is shared, so
/// mutation goes through `&mut self`.
#[derive(Debug)]
pub struct UploadSession {
    id: String,
    file: FileDescriptor,
    plan: ChunkPlan,
    status: UploadStatus,
    uploaded_chunks: BTreeSet<u32>,
    /// Per-chunk retry counters; an entry disappears when its chunk succeeds.
    retry_attempts: HashMap<u32, u32>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

impl UploadSession {
    /// Creates a freshly initialized session.
    pub fn new(id: String, file: FileDescriptor, plan: ChunkPlan) -> Result<Self, TransferError> {
        if plan.file_size() != file.file_size {
            return Err(TransferError::InvalidPlan(format!(
                "plan covers {} bytes but file has {}",
                plan.file_size(),
                file.file_size
            )));
        }
        Ok(Self {
            id,
            file,
            plan,
            status: UploadStatus::Initialized,
            uploaded_chunks: BTreeSet::new(),
            retry_attempts: HashMap::new(),
            started_at: None,
            finished_at: None,
            error: None,
        })
    }

    /// Rebuilds a session from persisted parameters and the backend's
    /// list of chunks it is still missing.
    ///
    /// Every planned index not in `missing` counts as acknowledged.
    pub fn restore(
        id: String,
        file: FileDescriptor,
        plan: ChunkPlan,
        missing: &[u32],
    ) -> Result<Self, TransferError> {
        let total = plan.total_chunks();
        if let Some(&index) = missing.iter().find(|&&i| i >= total) {
            return Err(TransferError::ChunkOutOfRange { index, total });
        }
        let missing: BTreeSet<u32> = missing.iter().copied().collect();

        let mut session = Self::new(id, file, plan)?;
        session.uploaded_chunks = plan.indices().filter(|i| !missing.contains(i)).collect();
        Ok(session)
    }

    /// Moves the session to `next`, enforcing the lifecycle:
    ///
    /// `initialized -> uploading -> chunks-completed -> completing -> completed`,
    /// plus `failed`/`cancelled` from any non-terminal state.
    pub fn transition(&mut self, next: UploadStatus) -> Result<(), TransferError> {
        use UploadStatus::*;

        let allowed = match (self.status, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed | Cancelled) => true,
            (Initialized, Uploading) => true,
            (Uploading, ChunksCompleted)
            | (ChunksCompleted, Completing)
            | (Completing, Completed) => self.is_fully_uploaded(),
            _ => false,
        };
        if !allowed {
            return Err(TransferError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        debug!(session = %self.id, from = %self.status, to = %next, "status transition");
        let now = Instant::now();
        if next == Uploading {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Marks the session failed with an error message.
    pub fn fail(&mut self, err: &str) -> Result<(), TransferError> {
        self.transition(UploadStatus::Failed)?;
        self.error = Some(err.to_string());
        Ok(())
    }

    /// Records a remote acknowledgement for `index`.
    ///
    /// Returns `true` if the index was not already acknowledged; repeated
    /// acknowledgements leave the set unchanged.
    pub fn mark_chunk_uploaded(&mut self, index: u32) -> Result<bool, TransferError> {
        let total = self.plan.total_chunks();
        if index >= total {
            return Err(TransferError::ChunkOutOfRange { index, total });
        }
        self.retry_attempts.remove(&index);
        Ok(self.uploaded_chunks.insert(index))
    }

    /// Adds `retries` to the retry counter of `index` and returns the new count.
    pub fn record_retries(&mut self, index: u32, retries: u32) -> u32 {
        let counter = self.retry_attempts.entry(index).or_insert(0);
        *counter += retries;
        *counter
    }

    /// Retry counter for `index` (0 once the chunk succeeded).
    pub fn retry_attempts(&self, index: u32) -> u32 {
        self.retry_attempts.get(&index).copied().unwrap_or(0)
    }

    /// Planned indices not yet acknowledged, in order.
    pub fn missing_chunks(&self) -> Vec<u32> {
        self.plan
            .indices()
            .filter(|i| !self.uploaded_chunks.contains(i))
            .collect()
    }

    /// `true` once every planned chunk has been acknowledged.
    pub fn is_fully_uploaded(&self) -> bool {
        self.uploaded_chunks.len() == self.plan.total_chunks() as usize
    }

    /// Acknowledged bytes, derived from the acknowledged ranges.
    pub fn bytes_uploaded(&self) -> u64 {
        self.uploaded_chunks
            .iter()
            .filter_map(|&i| self.plan.range(i))
            .map(|r| r.len())
            .sum()
    }

    /// Chunk-level progress snapshot.
    pub fn progress(&self) -> ChunkProgress {
        ChunkProgress::new(self.uploaded_chunks.len() as u32, self.plan.total_chunks())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn uploaded_chunks(&self) -> &BTreeSet<u32> {
        &self.uploaded_chunks
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Time spent since the session started uploading, frozen once it
    /// reaches a terminal state. `None` before the first chunk batch.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }
}
