//! Single-chunk delivery with per-attempt timeout and retry.

use std::sync::Arc;
use std::time::Duration;

use notedrop_protocol::messages::UploadChunkHeader;
use notedrop_transfer::{Chunk, ChunkRange, ChunkSource};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ChunkError, ChunkFailure, RemoteError};
use crate::events::EventSink;
use crate::remote::{RemoteStore, with_timeout};
use crate::types::UploadEvent;

/// Retry budget for transient chunk failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `attempt * base_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// A chunk the backend acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub chunk_index: u32,
    pub bytes: u64,
    /// Retries needed before the acknowledgement.
    pub retries: u32,
}

/// Sends chunks to a [`RemoteStore`].
#[derive(Clone)]
pub struct ChunkTransport {
    store: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl ChunkTransport {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            store,
            policy,
            attempt_timeout,
        }
    }

    /// Delivers chunk `range` of `source` for `session_id`.
    ///
    /// The chunk is re-read and re-hashed for every attempt. Transient
    /// failures are retried with backoff until the policy is exhausted;
    /// protocol rejections and read failures end the chunk immediately. Once
    /// `cancel` fires no further retry is started.
    pub(crate) async fn upload(
        &self,
        session_id: &str,
        source: &ChunkSource,
        range: ChunkRange,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, ChunkError> {
        let mut retries = 0u32;
        loop {
            let chunk = read_chunk(source, range).await?;
            let header = UploadChunkHeader {
                session_id: session_id.to_string(),
                chunk_index: range.index,
                chunk_hash: chunk.hash,
            };

            let result = with_timeout(
                self.attempt_timeout,
                self.store.upload_chunk(&header, chunk.data),
            )
            .await
            .and_then(|ack| check_ack(&header, ack.session_id, ack.chunk_index));

            let err = match result {
                Ok(()) => {
                    return Ok(ChunkReceipt {
                        chunk_index: range.index,
                        bytes: range.len(),
                        retries,
                    });
                }
                Err(e) => e,
            };

            if !err.is_retryable() || retries >= self.policy.max_retries || cancel.is_cancelled() {
                return Err(ChunkError::Remote(ChunkFailure {
                    chunk_index: range.index,
                    attempts: retries + 1,
                    error: err,
                }));
            }

            retries += 1;
            let delay = self.policy.delay_for_attempt(retries);
            warn!(
                session = %session_id,
                chunk = range.index,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "chunk upload failed, retrying"
            );
            events.emit(UploadEvent::ChunkRetry {
                session_id: session_id.to_string(),
                chunk_index: range.index,
                attempt: retries,
                delay,
                error: err.to_string(),
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ChunkError::Remote(ChunkFailure {
                        chunk_index: range.index,
                        attempts: retries,
                        error: err,
                    }));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn read_chunk(source: &ChunkSource, range: ChunkRange) -> Result<Chunk, ChunkError> {
    let source = source.clone();
    let read = tokio::task::spawn_blocking(move || source.read_chunk(&range)).await;
    match read {
        Ok(Ok(chunk)) => Ok(chunk),
        Ok(Err(source)) => Err(ChunkError::Integrity {
            chunk_index: range.index,
            source,
        }),
        Err(join) => Err(ChunkError::Integrity {
            chunk_index: range.index,
            source: notedrop_transfer::TransferError::Io(std::io::Error::other(join)),
        }),
    }
}

fn check_ack(
    header: &UploadChunkHeader,
    session_id: String,
    chunk_index: u32,
) -> Result<(), RemoteError> {
    if session_id != header.session_id || chunk_index != header.chunk_index {
        return Err(RemoteError::new(
            crate::error::RemoteErrorKind::InvalidResponse,
            format!(
                "acknowledged {session_id}/{chunk_index}, sent {}/{}",
                header.session_id, header.chunk_index
            ),
        ));
    }
    Ok(())
}
