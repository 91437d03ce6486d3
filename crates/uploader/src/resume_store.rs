//! Persisted resume state.
//!
//! One record per initialized session, kept in a JSON file so an upload
//! interrupted by a crash or restart can pick up where it left off. No file
//! bytes are stored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use notedrop_protocol::UploadMetadata;
use notedrop_transfer::{ChunkPlan, FileDescriptor, TransferError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors from resume store persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What is needed to rebuild a session after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub session_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub file_hash: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_token: Option<String>,
    #[serde(default, skip_serializing_if = "UploadMetadata::is_empty")]
    pub metadata: UploadMetadata,
    /// Local file the chunks are read from.
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ResumeRecord {
    /// Rebuilds the chunk plan, rejecting inconsistent records.
    pub fn plan(&self) -> Result<ChunkPlan, TransferError> {
        ChunkPlan::from_parts(self.file_size, self.chunk_size, self.total_chunks)
    }

    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            content_type: self.content_type.clone(),
            file_hash: self.file_hash.clone(),
        }
    }
}

/// JSON-file backed map of session id to [`ResumeRecord`].
///
/// Records are cached in memory and the whole file is rewritten after every
/// change.
pub struct ResumeStore {
    path: PathBuf,
    records: Mutex<HashMap<String, ResumeRecord>>,
}

impl ResumeStore {
    /// Opens the store, loading existing records from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn get(&self, session_id: &str) -> Option<ResumeRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Inserts or replaces the record for its session.
    pub fn save(&self, record: ResumeRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.session_id.clone(), record);
        self.persist(&records)
    }

    /// Drops the record for `session_id`. Returns whether one existed.
    pub fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.remove(session_id).is_none() {
            return Ok(false);
        }
        self.persist(&records)?;
        Ok(true)
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<ResumeRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<ResumeRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        list
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `records` to a sibling temp file and renames it into place.
    fn persist(&self, records: &HashMap<String, ResumeRecord>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} resume record(s) to {:?}", records.len(), self.path);
        Ok(())
    }
}

/// Loads records from a JSON file on disk.
fn load_records(path: &Path) -> Result<HashMap<String, ResumeRecord>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let records: HashMap<String, ResumeRecord> = serde_json::from_str(&data)?;
    debug!("loaded {} resume record(s) from {:?}", records.len(), path);
    Ok(records)
}

/// Returns the default resume store path.
pub fn default_state_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("notedrop").join("uploads.json"))
}

/// Returns the platform-specific data directory.
fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_DATA_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".local").join("share"))
    }
}
