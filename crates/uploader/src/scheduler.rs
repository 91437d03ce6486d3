//! Bounded-concurrency driver for the missing chunks of a session.

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use notedrop_protocol::UploadStatus;
use notedrop_transfer::{ChunkSource, SpeedCalculator, UploadSession};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ChunkError, ChunkFailure, RemoteErrorKind, UploadError};
use crate::events::EventSink;
use crate::transport::ChunkTransport;

/// Uploads missing chunks in batches of at most `concurrency`.
///
/// A batch is awaited in full before the next one starts, so no more than
/// `concurrency` uploads are ever outstanding. Any chunk failure ends the
/// session after its batch settles.
pub struct Scheduler {
    transport: ChunkTransport,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(transport: ChunkTransport, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency: concurrency.max(1),
        }
    }

    /// Drives `session` from its current state to `chunks-completed`.
    ///
    /// On failure the session is left `failed` (or `cancelled` if `cancel`
    /// fired) and the error names the chunks that did not make it. Returns
    /// the number of chunks acknowledged by this call.
    pub(crate) async fn run(
        &self,
        session: &mut UploadSession,
        source: &ChunkSource,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<u32, UploadError> {
        if session.status() == UploadStatus::Initialized {
            events.transition(session, UploadStatus::Uploading)?;
        }

        let session_id = session.id().to_string();
        let plan = *session.plan();
        let remaining = session.missing_chunks();
        let speed = SpeedCalculator::default();
        let mut sent = 0u32;

        debug!(
            session = %session_id,
            remaining = remaining.len(),
            concurrency = self.concurrency,
            "scheduling chunks"
        );

        for batch in remaining.chunks(self.concurrency) {
            if cancel.is_cancelled() {
                return Err(stop_cancelled(session, events));
            }

            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .filter_map(|&index| plan.range(index))
                .map(|range| {
                    self.transport
                        .upload(&session_id, source, range, events, cancel)
                })
                .collect();

            let mut failures: Vec<ChunkFailure> = Vec::new();
            let mut unreadable: Option<ChunkError> = None;

            while let Some(result) = in_flight.next().await {
                match result {
                    Ok(receipt) => {
                        debug!(
                            session = %session_id,
                            chunk = receipt.chunk_index,
                            retries = receipt.retries,
                            "chunk acknowledged"
                        );
                        session.mark_chunk_uploaded(receipt.chunk_index)?;
                        speed.add_sample(receipt.bytes);
                        sent += 1;
                        events.progress(session, receipt.chunk_index, &speed);
                    }
                    Err(ChunkError::Remote(failure)) => {
                        session.record_retries(
                            failure.chunk_index,
                            failure.attempts.saturating_sub(1),
                        );
                        failures.push(failure);
                    }
                    Err(err @ ChunkError::Integrity { .. }) => {
                        unreadable.get_or_insert(err);
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(stop_cancelled(session, events));
            }
            if let Some(err) = batch_error(&session_id, failures, unreadable) {
                session.fail(&err.to_string())?;
                events.status(session);
                return Err(err);
            }
        }

        events.transition(session, UploadStatus::ChunksCompleted)?;
        info!(session = %session_id, sent, total = plan.total_chunks(), "all chunks acknowledged");
        Ok(sent)
    }
}

fn stop_cancelled(session: &mut UploadSession, events: &EventSink) -> UploadError {
    match events.transition(session, UploadStatus::Cancelled) {
        Ok(()) => UploadError::Cancelled,
        Err(e) => e.into(),
    }
}

/// Folds the failures of one batch into the session-level error.
fn batch_error(
    session_id: &str,
    mut failures: Vec<ChunkFailure>,
    unreadable: Option<ChunkError>,
) -> Option<UploadError> {
    if let Some(ChunkError::Integrity {
        chunk_index,
        source,
    }) = unreadable
    {
        return Some(UploadError::Integrity {
            chunk_index,
            source,
        });
    }
    if failures.is_empty() {
        return None;
    }

    failures.sort_by_key(|f| f.chunk_index);
    if let Some(f) = failures
        .iter()
        .find(|f| f.error.kind == RemoteErrorKind::SessionNotFound)
    {
        return Some(UploadError::SessionExpired(format!(
            "{session_id} ({})",
            f.error.message
        )));
    }
    if let Some(f) = failures
        .iter()
        .find(|f| f.error.kind == RemoteErrorKind::InsufficientStorage)
    {
        return Some(UploadError::InsufficientStorage(format!(
            "chunk {}: {}",
            f.chunk_index, f.error.message
        )));
    }
    Some(UploadError::ChunksFailed {
        session_id: session_id.to_string(),
        failures,
    })
}
