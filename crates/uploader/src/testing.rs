//! In-memory [`RemoteStore`] for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notedrop_protocol::messages::{
    CancelUploadResponse, CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest,
    InitUploadResponse, UploadChunkHeader, UploadChunkResponse, UploadProgressResponse,
};
use notedrop_protocol::ArtifactRef;
use notedrop_transfer::{ChunkPlan, ChunkSource, checksum_bytes};

use crate::error::{RemoteError, RemoteErrorKind};
use crate::remote::{RemoteFuture, RemoteStore};

/// Scripted behaviour for one call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    Fail(RemoteErrorKind),
    /// Never answers.
    Hang,
}

struct StoredSession {
    req: InitUploadRequest,
    chunks: BTreeMap<u32, Vec<u8>>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    sessions: HashMap<String, StoredSession>,
    expired: HashSet<String>,
    chunk_scripts: HashMap<u32, VecDeque<Script>>,
    complete_scripts: VecDeque<Script>,
    init_scripts: VecDeque<Script>,
    chunk_calls: Vec<u32>,
    complete_calls: Vec<CompleteUploadRequest>,
    cancel_calls: Vec<String>,
    init_calls: Vec<InitUploadRequest>,
    init_hook: Option<Box<dyn Fn() + Send>>,
}

/// Backend double that keeps chunks in memory and verifies digests.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    chunk_delay: Duration,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every chunk upload takes `delay` before answering.
    pub(crate) fn with_chunk_delay(delay: Duration) -> Self {
        Self {
            chunk_delay: delay,
            ..Self::default()
        }
    }

    /// Queues behaviour for the next uploads of chunk `index` (any session).
    pub(crate) fn script_chunk(&self, index: u32, scripts: impl IntoIterator<Item = Script>) {
        let mut state = self.state.lock().unwrap();
        state.chunk_scripts.entry(index).or_default().extend(scripts);
    }

    pub(crate) fn script_complete(&self, scripts: impl IntoIterator<Item = Script>) {
        self.state.lock().unwrap().complete_scripts.extend(scripts);
    }

    pub(crate) fn script_init(&self, scripts: impl IntoIterator<Item = Script>) {
        self.state.lock().unwrap().init_scripts.extend(scripts);
    }

    /// Runs `hook` inside every init call, before the session is created.
    pub(crate) fn on_init(&self, hook: impl Fn() + Send + 'static) {
        self.state.lock().unwrap().init_hook = Some(Box::new(hook));
    }

    /// Forgets a session as if it had expired server-side.
    pub(crate) fn expire(&self, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(session_id);
        state.expired.insert(session_id.to_string());
    }

    pub(crate) fn chunk_calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().chunk_calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        let mut state = self.state.lock().unwrap();
        state.chunk_calls.clear();
        state.complete_calls.clear();
    }

    pub(crate) fn complete_calls(&self) -> Vec<CompleteUploadRequest> {
        self.state.lock().unwrap().complete_calls.clone()
    }

    pub(crate) fn cancel_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().cancel_calls.clone()
    }

    pub(crate) fn init_calls(&self) -> Vec<InitUploadRequest> {
        self.state.lock().unwrap().init_calls.clone()
    }

    /// Indices the backend holds for `session_id`, in order.
    pub(crate) fn received(&self, session_id: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .map(|s| s.chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn pop_chunk_script(&self, index: u32) -> Option<Script> {
        let mut state = self.state.lock().unwrap();
        state.chunk_calls.push(index);
        state.chunk_scripts.get_mut(&index).and_then(VecDeque::pop_front)
    }

    fn accept_chunk(
        &self,
        header: &UploadChunkHeader,
        data: Vec<u8>,
    ) -> Result<UploadChunkResponse, RemoteError> {
        let mut state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get_mut(&header.session_id)
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::SessionNotFound, "unknown session"))?;
        if header.chunk_index >= session.req.total_chunks {
            return Err(RemoteError::new(RemoteErrorKind::Rejected(400), "index out of range"));
        }
        if checksum_bytes(&data) != header.chunk_hash {
            return Err(RemoteError::new(RemoteErrorKind::HashMismatch, "digest differs"));
        }
        session.chunks.insert(header.chunk_index, data);
        Ok(UploadChunkResponse {
            session_id: header.session_id.clone(),
            chunk_index: header.chunk_index,
        })
    }

    fn assemble(&self, session_id: &str) -> Result<CompleteUploadResponse, RemoteError> {
        let state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get(session_id)
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::SessionNotFound, "unknown session"))?;
        if session.chunks.len() != session.req.total_chunks as usize {
            return Err(RemoteError::new(RemoteErrorKind::Rejected(409), "chunks incomplete"));
        }
        let file: Vec<u8> = session.chunks.values().flatten().copied().collect();
        let file_hash = checksum_bytes(&file);
        if file_hash != session.req.file_hash {
            return Err(RemoteError::new(RemoteErrorKind::HashMismatch, "file digest differs"));
        }
        Ok(CompleteUploadResponse {
            session_id: session_id.to_string(),
            artifact: ArtifactRef {
                id: format!("artifact-{session_id}"),
                url: None,
                size: file.len() as u64,
                file_hash,
            },
        })
    }
}

async fn play(script: Option<Script>) -> Result<(), RemoteError> {
    match script {
        None => Ok(()),
        Some(Script::Fail(kind)) => Err(RemoteError::new(kind, "scripted failure")),
        Some(Script::Hang) => std::future::pending().await,
    }
}

impl RemoteStore for MemoryStore {
    fn init_upload(&self, req: &InitUploadRequest) -> RemoteFuture<'_, InitUploadResponse> {
        let req = req.clone();
        Box::pin(async move {
            let script = {
                let mut state = self.state.lock().unwrap();
                state.init_calls.push(req.clone());
                if let Some(hook) = &state.init_hook {
                    hook();
                }
                state.init_scripts.pop_front()
            };
            play(script).await?;

            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let session_id = format!("session-{}", state.next_id);
            state.sessions.insert(
                session_id.clone(),
                StoredSession {
                    req,
                    chunks: BTreeMap::new(),
                },
            );
            Ok(InitUploadResponse { session_id })
        })
    }

    fn upload_chunk(
        &self,
        header: &UploadChunkHeader,
        data: Vec<u8>,
    ) -> RemoteFuture<'_, UploadChunkResponse> {
        let header = header.clone();
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let script = self.pop_chunk_script(header.chunk_index);
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            play(script).await?;
            self.accept_chunk(&header, data)
        })
    }

    fn query_progress(&self, session_id: &str) -> RemoteFuture<'_, UploadProgressResponse> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let session = state.sessions.get(&session_id).ok_or_else(|| {
                RemoteError::new(RemoteErrorKind::SessionNotFound, "unknown session")
            })?;
            let missing_chunks: Vec<u32> = (0..session.req.total_chunks)
                .filter(|i| !session.chunks.contains_key(i))
                .collect();
            Ok(UploadProgressResponse {
                session_id: session_id.clone(),
                total_chunks: session.req.total_chunks,
                uploaded_chunk_count: session.chunks.len() as u32,
                missing_chunks,
            })
        })
    }

    fn complete_upload(
        &self,
        session_id: &str,
        req: &CompleteUploadRequest,
    ) -> RemoteFuture<'_, CompleteUploadResponse> {
        let session_id = session_id.to_string();
        let req = req.clone();
        Box::pin(async move {
            let script = {
                let mut state = self.state.lock().unwrap();
                state.complete_calls.push(req);
                state.complete_scripts.pop_front()
            };
            play(script).await?;
            self.assemble(&session_id)
        })
    }

    fn cancel_upload(&self, session_id: &str) -> RemoteFuture<'_, CancelUploadResponse> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.cancel_calls.push(session_id.clone());
            let released = state.sessions.remove(&session_id).is_some();
            if !released && state.expired.contains(&session_id) {
                return Err(RemoteError::new(RemoteErrorKind::SessionNotFound, "expired"));
            }
            Ok(CancelUploadResponse {
                session_id,
                released,
            })
        })
    }
}

/// Writes `data` to a temp file and opens it as a source.
pub(crate) fn temp_source(data: &[u8]) -> (tempfile::TempDir, ChunkSource) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.pdf");
    std::fs::write(&path, data).unwrap();
    let source = ChunkSource::open(&path).unwrap();
    (dir, source)
}

/// Writes `len` bytes of a repeating pattern to `dir/name`.
pub(crate) fn write_pattern(dir: &Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

/// Opens a session on `store` for `source` directly, bypassing the uploader.
pub(crate) async fn init_session(
    store: &Arc<MemoryStore>,
    source: &ChunkSource,
    plan: &ChunkPlan,
) -> String {
    let req = InitUploadRequest {
        file_name: "notes.pdf".into(),
        file_size: source.size(),
        content_type: "application/pdf".into(),
        total_chunks: plan.total_chunks(),
        chunk_size: plan.chunk_size(),
        file_hash: source.checksum().unwrap(),
        metadata: Default::default(),
    };
    store.init_upload(&req).await.unwrap().session_id
}
