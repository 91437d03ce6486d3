//! Non-blocking event emission.

use notedrop_protocol::UploadStatus;
use notedrop_transfer::{SpeedCalculator, UploadSession};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use crate::types::{UploadEvent, UploadProgress};

/// Sending half of the uploader's event channel.
///
/// A full channel or a dropped receiver never stalls the upload; the event
/// is discarded instead.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<UploadEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<UploadEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!(session = %event.session_id(), "event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub(crate) fn status(&self, session: &UploadSession) {
        self.emit(UploadEvent::StatusChanged {
            session_id: session.id().to_string(),
            status: session.status(),
        });
    }

    /// Applies `next` to the session and reports it.
    pub(crate) fn transition(
        &self,
        session: &mut UploadSession,
        next: UploadStatus,
    ) -> Result<(), notedrop_transfer::TransferError> {
        session.transition(next)?;
        self.status(session);
        Ok(())
    }

    pub(crate) fn progress(
        &self,
        session: &UploadSession,
        chunk_index: u32,
        speed: &SpeedCalculator,
    ) {
        let progress = session.progress();
        let bytes_uploaded = session.bytes_uploaded();
        let remaining = session.file().file_size.saturating_sub(bytes_uploaded);
        self.emit(UploadEvent::Progress(UploadProgress {
            session_id: session.id().to_string(),
            percent: progress.percent,
            completed_chunks: progress.completed_chunks,
            total_chunks: progress.total_chunks,
            current_chunk_index: chunk_index,
            bytes_uploaded,
            bytes_per_second: speed.bytes_per_second(),
            eta: speed.eta(remaining),
        }));
    }
}
