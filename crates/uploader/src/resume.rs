//! Rebuilding sessions from persisted state and the backend's view.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notedrop_transfer::{ChunkSource, TransferError, UploadSession};
use tracing::{debug, info, warn};

use crate::error::{RemoteError, RemoteErrorKind, UploadError};
use crate::remote::{RemoteStore, with_timeout};
use crate::resume_store::{ResumeRecord, ResumeStore};
use crate::types::ResumeInfo;

/// A session rebuilt and ready to drive.
pub(crate) struct Prepared {
    pub session: UploadSession,
    pub source: ChunkSource,
    pub record: ResumeRecord,
}

/// Reconciles a persisted record with the backend's list of missing chunks.
pub struct ResumeCoordinator<'a> {
    store: &'a dyn RemoteStore,
    records: &'a ResumeStore,
    request_timeout: Duration,
}

impl<'a> ResumeCoordinator<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        records: &'a ResumeStore,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            records,
            request_timeout,
        }
    }

    /// Rebuilds `session_id` from its record, reading chunks from `source_path`.
    ///
    /// The source must still have the recorded size and digest. A session the
    /// backend no longer knows has its record dropped.
    pub(crate) async fn prepare(
        &self,
        session_id: &str,
        source_path: &Path,
    ) -> Result<Prepared, UploadError> {
        let mut record = self
            .records
            .get(session_id)
            .ok_or_else(|| UploadError::NoResumeState(session_id.to_string()))?;
        let plan = record.plan()?;

        let source = open_verified(source_path, &record).await?;
        if record.source_path != source_path {
            debug!(session = %session_id, path = %source_path.display(), "source moved");
            record.source_path = source_path.to_path_buf();
            self.records.save(record.clone())?;
        }

        let query = self.store.query_progress(session_id);
        let progress = match with_timeout(self.request_timeout, query).await {
            Ok(progress) => progress,
            Err(e) if e.kind == RemoteErrorKind::SessionNotFound => {
                warn!(
                    session = %session_id,
                    "session expired on the backend, dropping resume state"
                );
                if let Err(err) = self.records.remove(session_id) {
                    warn!(session = %session_id, error = %err, "failed to drop resume record");
                }
                return Err(UploadError::SessionExpired(session_id.to_string()));
            }
            Err(e) => return Err(UploadError::Progress(e)),
        };

        if progress.total_chunks != plan.total_chunks() {
            return Err(UploadError::Progress(RemoteError::new(
                RemoteErrorKind::InvalidResponse,
                format!(
                    "backend reports {} chunks, record has {}",
                    progress.total_chunks,
                    plan.total_chunks()
                ),
            )));
        }

        let session = UploadSession::restore(
            session_id.to_string(),
            record.descriptor(),
            plan,
            &progress.missing_chunks,
        )?;
        info!(
            session = %session_id,
            missing = progress.missing_chunks.len(),
            total = plan.total_chunks(),
            "session restored"
        );

        Ok(Prepared {
            session,
            source,
            record,
        })
    }

    /// Reports whether `session_id` could be resumed right now.
    ///
    /// The recorded source must still match both size and digest.
    pub async fn inspect(&self, session_id: &str, active: bool) -> Result<ResumeInfo, UploadError> {
        let record = self
            .records
            .get(session_id)
            .ok_or_else(|| UploadError::NoResumeState(session_id.to_string()))?;

        let source_check = open_verified(&record.source_path, &record).await;

        let mut info = ResumeInfo {
            record,
            missing_chunks: Vec::new(),
            uploaded_chunk_count: 0,
            active,
            resumable: false,
            reason: None,
        };

        match with_timeout(self.request_timeout, self.store.query_progress(session_id)).await {
            Ok(progress) => {
                info.missing_chunks = progress.missing_chunks;
                info.uploaded_chunk_count = progress.uploaded_chunk_count;
            }
            Err(e) if e.kind == RemoteErrorKind::SessionNotFound => {
                info.reason = Some("session expired on the backend".into());
                return Ok(info);
            }
            Err(e) => return Err(UploadError::Progress(e)),
        }

        if let Err(e) = source_check {
            info.reason = Some(e.to_string());
        } else if active {
            info.reason = Some("session is being driven by another task".into());
        } else {
            info.resumable = true;
        }
        Ok(info)
    }
}

/// Opens `path` and checks it is the file the record was created for.
async fn open_verified(path: &Path, record: &ResumeRecord) -> Result<ChunkSource, UploadError> {
    let path: PathBuf = path.to_path_buf();
    let size = record.file_size;
    let expected = record.file_hash.clone();

    let source = tokio::task::spawn_blocking(move || {
        let source = ChunkSource::open_expecting(&path, size)?;
        let digest = source.checksum()?;
        if digest != expected {
            return Err(TransferError::SourceUnavailable(format!(
                "{} no longer matches the uploaded file",
                path.display()
            )));
        }
        Ok(source)
    })
    .await??;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, init_session, temp_source};
    use chrono::Utc;
    use notedrop_protocol::messages::UploadChunkHeader;
    use notedrop_transfer::ChunkPlan;
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        _state: tempfile::TempDir,
        source: ChunkSource,
        store: Arc<MemoryStore>,
        records: ResumeStore,
        session_id: String,
    }

    /// A 5-chunk session with chunks 0, 1 and 2 already on the backend.
    async fn interrupted() -> Fixture {
        let data: Vec<u8> = (0u8..20).collect();
        let (dir, source) = temp_source(&data);
        let plan = ChunkPlan::new(20, 4).unwrap();
        let store = Arc::new(MemoryStore::new());
        let session_id = init_session(&store, &source, &plan).await;
        for i in 0..3 {
            let chunk = source.read_chunk(&plan.range(i).unwrap()).unwrap();
            let header = UploadChunkHeader {
                session_id: session_id.clone(),
                chunk_index: i,
                chunk_hash: chunk.hash,
            };
            store.upload_chunk(&header, chunk.data).await.unwrap();
        }

        let state = tempfile::tempdir().unwrap();
        let records = ResumeStore::new(state.path().join("uploads.json")).unwrap();
        records
            .save(ResumeRecord {
                session_id: session_id.clone(),
                file_name: "notes.pdf".into(),
                file_size: 20,
                content_type: "application/pdf".into(),
                file_hash: source.checksum().unwrap(),
                total_chunks: 5,
                chunk_size: 4,
                destination_token: None,
                metadata: Default::default(),
                source_path: source.path().to_path_buf(),
                created_at: Utc::now(),
            })
            .unwrap();

        Fixture {
            _dir: dir,
            _state: state,
            source,
            store,
            records,
            session_id,
        }
    }

    #[tokio::test]
    async fn restores_acknowledged_set_from_backend() {
        let fx = interrupted().await;
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let prepared = coordinator
            .prepare(&fx.session_id, fx.source.path())
            .await
            .unwrap();

        assert_eq!(prepared.session.missing_chunks(), vec![3, 4]);
        assert_eq!(
            prepared.session.status(),
            notedrop_protocol::UploadStatus::Initialized
        );
        assert_eq!(prepared.source.size(), 20);
    }

    #[tokio::test]
    async fn unknown_session_has_no_state() {
        let fx = interrupted().await;
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));
        let err = coordinator
            .prepare("nope", fx.source.path())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UploadError::NoResumeState(_)));
    }

    #[tokio::test]
    async fn expired_session_drops_record() {
        let fx = interrupted().await;
        fx.store.expire(&fx.session_id);
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let err = coordinator
            .prepare(&fx.session_id, fx.source.path())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, UploadError::SessionExpired(_)));
        assert!(fx.records.get(&fx.session_id).is_none());
    }

    #[tokio::test]
    async fn missing_source_cannot_resume() {
        let fx = interrupted().await;
        std::fs::remove_file(fx.source.path()).unwrap();
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let err = coordinator
            .prepare(&fx.session_id, fx.source.path())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, UploadError::SourceUnavailable(_)));
        assert!(fx.records.get(&fx.session_id).is_some());
    }

    #[tokio::test]
    async fn modified_source_cannot_resume() {
        let fx = interrupted().await;
        std::fs::write(fx.source.path(), [9u8; 20]).unwrap();
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let err = coordinator
            .prepare(&fx.session_id, fx.source.path())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, UploadError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn moved_source_updates_record() {
        let fx = interrupted().await;
        let moved = fx._dir.path().join("moved.pdf");
        std::fs::rename(fx.source.path(), &moved).unwrap();
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        coordinator.prepare(&fx.session_id, &moved).await.unwrap();

        assert_eq!(fx.records.get(&fx.session_id).unwrap().source_path, moved);
    }

    #[tokio::test]
    async fn inspect_reports_missing_chunks() {
        let fx = interrupted().await;
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let info = coordinator.inspect(&fx.session_id, false).await.unwrap();
        assert!(info.resumable);
        assert_eq!(info.missing_chunks, vec![3, 4]);
        assert_eq!(info.uploaded_chunk_count, 3);

        let busy = coordinator.inspect(&fx.session_id, true).await.unwrap();
        assert!(!busy.resumable);
        assert!(busy.active);
    }

    #[tokio::test]
    async fn inspect_explains_missing_source() {
        let fx = interrupted().await;
        std::fs::remove_file(fx.source.path()).unwrap();
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let info = coordinator.inspect(&fx.session_id, false).await.unwrap();
        assert!(!info.resumable);
        assert!(info.reason.unwrap().contains("source unavailable"));
    }

    #[tokio::test]
    async fn inspect_rejects_same_size_edit() {
        let fx = interrupted().await;
        std::fs::write(fx.source.path(), [7u8; 20]).unwrap();
        let coordinator =
            ResumeCoordinator::new(fx.store.as_ref(), &fx.records, Duration::from_secs(30));

        let info = coordinator.inspect(&fx.session_id, false).await.unwrap();
        assert!(!info.resumable);
        assert!(info.reason.unwrap().contains("no longer matches"));
        assert_eq!(info.missing_chunks, vec![3, 4]);
    }
}
