//! Mapping of HTTP failures onto [`RemoteErrorKind`].

use notedrop_protocol::{ErrorBody, ErrorCode};
use notedrop_uploader::{RemoteError, RemoteErrorKind};

/// Longest slice of a non-JSON error body kept in the message.
const MAX_BODY_EXCERPT: usize = 200;

/// Classifies a transport failure reported by `reqwest`.
pub fn classify_reqwest(err: reqwest::Error) -> RemoteError {
    let kind = if err.is_timeout() {
        RemoteErrorKind::Timeout
    } else if err.is_connect() {
        RemoteErrorKind::ConnectionAborted
    } else if err.is_decode() {
        RemoteErrorKind::InvalidResponse
    } else {
        RemoteErrorKind::Network
    };
    RemoteError::new(kind, err.to_string())
}

/// Classifies a non-2xx response from its status and body.
///
/// The body is read as an [`ErrorBody`] when possible; its code takes
/// precedence over the status for the protocol-level kinds.
pub fn classify_status(status: u16, body: &[u8]) -> RemoteError {
    let parsed = ErrorBody::parse(body);
    let code = parsed.as_ref().map(|b| b.code);

    let kind = match (code, status) {
        (Some(ErrorCode::SessionNotFound), _) => RemoteErrorKind::SessionNotFound,
        (Some(ErrorCode::HashMismatch), _) => RemoteErrorKind::HashMismatch,
        (Some(ErrorCode::InsufficientStorage), _) => RemoteErrorKind::InsufficientStorage,
        (_, 404 | 410) => RemoteErrorKind::SessionNotFound,
        (_, 507) => RemoteErrorKind::InsufficientStorage,
        (_, 500..=599) => RemoteErrorKind::ServerError(status),
        _ => RemoteErrorKind::Rejected(status),
    };

    let message = match parsed {
        Some(b) if !b.message.is_empty() => b.message,
        _ => excerpt(body).unwrap_or_else(|| format!("HTTP {status}")),
    };
    RemoteError::new(kind, message)
}

fn excerpt(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_BODY_EXCERPT).collect())
}
