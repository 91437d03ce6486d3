//! Final handshake: ask the backend to assemble and verify the file.

use std::sync::Arc;
use std::time::Duration;

use notedrop_protocol::messages::CompleteUploadRequest;
use notedrop_protocol::{ArtifactRef, UploadStatus};
use notedrop_transfer::UploadSession;
use tracing::{info, warn};

use crate::error::{RemoteErrorKind, UploadError};
use crate::events::EventSink;
use crate::remote::{RemoteStore, with_timeout};

/// Issues the completion request for fully uploaded sessions.
pub struct CompletionHandshake {
    store: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl CompletionHandshake {
    pub fn new(store: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Moves `session` through `completing` to `completed`.
    ///
    /// Refuses to contact the backend unless every planned chunk has been
    /// acknowledged. A failed or timed-out call leaves the session `failed`.
    pub(crate) async fn complete(
        &self,
        session: &mut UploadSession,
        destination_token: Option<String>,
        events: &EventSink,
    ) -> Result<ArtifactRef, UploadError> {
        if !session.is_fully_uploaded() {
            return Err(UploadError::IncompleteChunks {
                uploaded: session.uploaded_chunks().len() as u32,
                total: session.plan().total_chunks(),
            });
        }
        events.transition(session, UploadStatus::Completing)?;

        let req = CompleteUploadRequest { destination_token };
        let result = with_timeout(
            self.timeout,
            self.store.complete_upload(session.id(), &req),
        )
        .await;

        match result {
            Ok(resp) => {
                if resp.artifact.file_hash != session.file().file_hash {
                    warn!(
                        session = %session.id(),
                        expected = %session.file().file_hash,
                        reported = %resp.artifact.file_hash,
                        "artifact digest differs from local file digest"
                    );
                }
                events.transition(session, UploadStatus::Completed)?;
                info!(session = %session.id(), artifact = %resp.artifact.id, "upload completed");
                Ok(resp.artifact)
            }
            Err(e) => {
                let err = match e.kind {
                    RemoteErrorKind::SessionNotFound => {
                        UploadError::SessionExpired(session.id().to_string())
                    }
                    RemoteErrorKind::InsufficientStorage => {
                        UploadError::InsufficientStorage(e.message.clone())
                    }
                    _ => UploadError::Completion(e),
                };
                session.fail(&err.to_string())?;
                events.status(session);
                Err(err)
            }
        }
    }
}
