//! Upload orchestrator.
//!
//! Ties planning, the scheduler, resume and the completion handshake
//! together, persists resume state and publishes events.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use notedrop_protocol::UploadStatus;
use notedrop_protocol::messages::InitUploadRequest;
use notedrop_transfer::{
    ChunkPlan, ChunkSource, FileDescriptor, TransferError, UploadSession, validate_file_name,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::completion::CompletionHandshake;
use crate::config::UploaderConfig;
use crate::error::{RemoteErrorKind, UploadError};
use crate::events::EventSink;
use crate::registry::{SessionLease, SessionRegistry};
use crate::remote::{RemoteStore, with_timeout};
use crate::resume::ResumeCoordinator;
use crate::resume_store::{ResumeRecord, ResumeStore};
use crate::scheduler::Scheduler;
use crate::transport::ChunkTransport;
use crate::types::{
    CancelOutcome, ResumeInfo, UploadEvent, UploadOutcome, UploadRequest, guess_content_type,
};

/// Drives uploads against one remote store.
pub struct Uploader {
    store: Arc<dyn RemoteStore>,
    records: Arc<ResumeStore>,
    registry: Arc<SessionRegistry>,
    config: UploaderConfig,
    events: EventSink,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl Uploader {
    /// Creates an uploader with its own session registry.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        records: Arc<ResumeStore>,
        config: UploaderConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(256);
        Ok(Self {
            store,
            records,
            registry: SessionRegistry::new(),
            config,
            events: EventSink::new(events_tx),
            events_rx: Some(events_rx),
        })
    }

    /// Shares `registry` with other uploaders in the process.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Uploads a file from scratch.
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, UploadError> {
        let source = {
            let path = request.source_path.clone();
            tokio::task::spawn_blocking(move || ChunkSource::open(&path)).await??
        };

        let file_name = match request.file_name {
            Some(name) => name,
            None => source.file_name().ok_or_else(|| {
                TransferError::InvalidFileName(format!(
                    "{} has no usable file name",
                    source.path().display()
                ))
            })?,
        };
        validate_file_name(&file_name)?;
        let content_type = request
            .content_type
            .unwrap_or_else(|| guess_content_type(source.path()).to_string());
        let plan = ChunkPlan::new(source.size(), self.config.chunk_size)?;

        let file_hash = {
            let hashed = source.clone();
            let hashing = tokio::task::spawn_blocking(move || hashed.checksum());
            tokio::select! {
                joined = hashing => joined??,
                _ = self.registry.shutdown_token().cancelled() => {
                    info!(path = %source.path().display(), "upload interrupted while hashing");
                    return Err(UploadError::Cancelled);
                }
            }
        };
        if self.registry.shutdown_requested() {
            info!(path = %source.path().display(), "upload interrupted before init");
            return Err(UploadError::Cancelled);
        }
        let file = FileDescriptor {
            file_name,
            file_size: source.size(),
            content_type,
            file_hash,
        };

        let init = InitUploadRequest {
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            content_type: file.content_type.clone(),
            total_chunks: plan.total_chunks(),
            chunk_size: plan.chunk_size(),
            file_hash: file.file_hash.clone(),
            metadata: request.metadata.clone(),
        };
        let resp = with_timeout(self.config.request_timeout(), self.store.init_upload(&init))
            .await
            .map_err(|e| match e.kind {
                RemoteErrorKind::InsufficientStorage => UploadError::InsufficientStorage(e.message),
                _ => UploadError::Init(e),
            })?;
        let session_id = resp.session_id;

        let lease = self.registry.acquire(&session_id)?;
        let session = UploadSession::new(session_id.clone(), file, plan)?;

        let record = ResumeRecord {
            session_id: session_id.clone(),
            file_name: session.file().file_name.clone(),
            file_size: session.file().file_size,
            content_type: session.file().content_type.clone(),
            file_hash: session.file().file_hash.clone(),
            total_chunks: plan.total_chunks(),
            chunk_size: plan.chunk_size(),
            destination_token: request.destination_token.clone(),
            metadata: request.metadata,
            source_path: source.path().to_path_buf(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.records.save(record) {
            self.release_remote(&session_id).await;
            return Err(e.into());
        }

        info!(
            session = %session_id,
            file = %session.file().file_name,
            bytes = session.file().file_size,
            chunks = plan.total_chunks(),
            "upload session initialized"
        );
        self.events.emit(UploadEvent::Started {
            session_id: session_id.clone(),
            file_name: session.file().file_name.clone(),
            total_chunks: plan.total_chunks(),
            resumed: false,
        });
        self.events.status(&session);

        self.drive(session, source, lease, request.destination_token, false)
            .await
    }

    /// Continues a previously initialized session, reading from `source_path`.
    pub async fn resume(
        &self,
        session_id: &str,
        source_path: &Path,
    ) -> Result<UploadOutcome, UploadError> {
        let lease = self.registry.acquire(session_id)?;
        let prepared = self
            .coordinator()
            .prepare(session_id, source_path)
            .await?;

        info!(
            session = %session_id,
            missing = prepared.session.missing_chunks().len(),
            "resuming upload"
        );
        self.events.emit(UploadEvent::Started {
            session_id: session_id.to_string(),
            file_name: prepared.record.file_name.clone(),
            total_chunks: prepared.record.total_chunks,
            resumed: true,
        });
        self.events.status(&prepared.session);

        self.drive(
            prepared.session,
            prepared.source,
            lease,
            prepared.record.destination_token,
            true,
        )
        .await
    }

    /// Reports whether a persisted session can be resumed.
    pub async fn inspect(&self, session_id: &str) -> Result<ResumeInfo, UploadError> {
        self.coordinator()
            .inspect(session_id, self.registry.is_active(session_id))
            .await
    }

    /// Cancels a session.
    ///
    /// An active session is signalled and winds down after its current
    /// batch. An idle persisted session is released on the backend and its
    /// record dropped.
    pub async fn cancel(&self, session_id: &str) -> Result<CancelOutcome, UploadError> {
        let _lease = match self.registry.acquire(session_id) {
            Ok(lease) => lease,
            Err(_) => {
                self.registry.cancel(session_id);
                info!(session = %session_id, "cancellation requested");
                return Ok(CancelOutcome::Signalled);
            }
        };

        if self.records.get(session_id).is_none() {
            return Err(UploadError::NoResumeState(session_id.to_string()));
        }

        let remote_released = match with_timeout(
            self.config.request_timeout(),
            self.store.cancel_upload(session_id),
        )
        .await
        {
            Ok(resp) => resp.released,
            Err(e) if e.kind == RemoteErrorKind::SessionNotFound => false,
            Err(e) => return Err(UploadError::CancelRequest(e)),
        };

        self.forget(session_id);
        self.events.emit(UploadEvent::Cancelled {
            session_id: session_id.to_string(),
        });
        info!(session = %session_id, remote_released, "idle session cancelled");
        Ok(CancelOutcome::Released { remote_released })
    }

    /// Persisted sessions that were never completed, oldest first.
    pub fn pending(&self) -> Vec<ResumeRecord> {
        self.records.records()
    }

    fn coordinator(&self) -> ResumeCoordinator<'_> {
        ResumeCoordinator::new(
            self.store.as_ref(),
            &self.records,
            self.config.request_timeout(),
        )
    }

    /// Runs the scheduler and the handshake, then settles the session.
    async fn drive(
        &self,
        mut session: UploadSession,
        source: ChunkSource,
        lease: SessionLease,
        destination_token: Option<String>,
        resumed: bool,
    ) -> Result<UploadOutcome, UploadError> {
        let scheduler = Scheduler::new(
            ChunkTransport::new(
                self.store.clone(),
                self.config.retry_policy(),
                self.config.chunk_timeout(),
            ),
            self.config.concurrency,
        );
        let handshake =
            CompletionHandshake::new(self.store.clone(), self.config.complete_timeout());

        let result = match scheduler
            .run(&mut session, &source, &self.events, lease.token())
            .await
        {
            Ok(sent) => handshake
                .complete(&mut session, destination_token, &self.events)
                .await
                .map(|artifact| (sent, artifact)),
            Err(e) => Err(e),
        };

        match result {
            Ok((chunks_sent, artifact)) => {
                self.forget(session.id());
                info!(
                    session = %session.id(),
                    chunks_sent,
                    elapsed_ms = session.elapsed().map(|d| d.as_millis() as u64),
                    "upload finished"
                );
                self.events.emit(UploadEvent::Completed {
                    session_id: session.id().to_string(),
                    artifact: artifact.clone(),
                });
                Ok(UploadOutcome {
                    session_id: session.id().to_string(),
                    artifact,
                    resumed,
                    chunks_sent,
                    total_chunks: session.plan().total_chunks(),
                })
            }
            Err(UploadError::Cancelled) => {
                self.finish_cancelled(&mut session).await;
                Err(UploadError::Cancelled)
            }
            Err(err) => Err(self.finish_failed(&mut session, err)),
        }
    }

    async fn finish_cancelled(&self, session: &mut UploadSession) {
        if !session.status().is_terminal()
            && let Err(e) = self.events.transition(session, UploadStatus::Cancelled)
        {
            warn!(session = %session.id(), error = %e, "could not mark session cancelled");
        }
        self.release_remote(session.id()).await;
        self.forget(session.id());
        self.events.emit(UploadEvent::Cancelled {
            session_id: session.id().to_string(),
        });
        info!(
            session = %session.id(),
            acknowledged = session.uploaded_chunks().len(),
            "upload cancelled"
        );
    }

    fn finish_failed(&self, session: &mut UploadSession, err: UploadError) -> UploadError {
        if !session.status().is_terminal() && session.fail(&err.to_string()).is_ok() {
            self.events.status(session);
        }
        let resumable = err.is_resumable();
        if !resumable {
            self.forget(session.id());
        }
        self.events.emit(UploadEvent::Failed {
            session_id: session.id().to_string(),
            error: err.to_string(),
            failed_chunks: err.failed_chunks(),
            resumable,
        });
        error!(
            session = %session.id(),
            error = %err,
            resumable,
            elapsed_ms = session.elapsed().map(|d| d.as_millis() as u64),
            "upload failed"
        );
        err
    }

    /// Tells the backend to drop a session; failures are only logged.
    async fn release_remote(&self, session_id: &str) {
        match with_timeout(
            self.config.request_timeout(),
            self.store.cancel_upload(session_id),
        )
        .await
        {
            Ok(resp) => info!(
                session = %session_id,
                released = resp.released,
                "backend session released"
            ),
            Err(e) => warn!(
                session = %session_id,
                error = %e,
                "failed to release backend session"
            ),
        }
    }

    fn forget(&self, session_id: &str) {
        if let Err(e) = self.records.remove(session_id) {
            warn!(session = %session_id, error = %e, "failed to drop resume record");
        }
    }
}
