use serde::{Deserialize, Serialize};

use crate::types::{ArtifactRef, UploadMetadata};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub file_hash: String,
    #[serde(default, skip_serializing_if = "UploadMetadata::is_empty")]
    pub metadata: UploadMetadata,
}

/// Header data sent alongside the raw bytes of one chunk.
///
/// Over HTTP the session and index travel in the path and the hash in
/// [`CHUNK_HASH_HEADER`](crate::constants::CHUNK_HASH_HEADER).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkHeader {
    pub session_id: String,
    pub chunk_index: u32,
    pub chunk_hash: String,
}

/// Asks the backend to assemble the acknowledged chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub session_id: String,
}

/// Acknowledges one durable chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub session_id: String,
    pub chunk_index: u32,
}

/// Authoritative per-session progress, reflecting durable state only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressResponse {
    pub session_id: String,
    pub total_chunks: u32,
    pub uploaded_chunk_count: u32,
    #[serde(default)]
    pub missing_chunks: Vec<u32>,
}

/// Confirms assembly of the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub session_id: String,
    pub artifact: ArtifactRef,
}

/// Confirms the backend released the session's partial state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelUploadResponse {
    pub session_id: String,
    #[serde(default)]
    pub released: bool,
}
