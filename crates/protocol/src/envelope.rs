use serde::{Deserialize, Serialize};

/// Machine-readable error code in a backend error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The session id is unknown or has expired.
    SessionNotFound,
    /// The chunk hash did not match the received bytes.
    HashMismatch,
    /// The destination storage cannot hold the artifact.
    InsufficientStorage,
    /// Completion was requested before every chunk arrived.
    ChunksIncomplete,
    /// The request was malformed.
    InvalidRequest,
    /// Unspecified server-side failure.
    Internal,
    /// A code this client does not know.
    #[serde(other)]
    Unknown,
}

/// Body of every non-2xx response from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Parses an error body, returning `None` when the payload is not one.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}
