//! Upload backend client.
//!
//! Async HTTP client using `reqwest` with optional Bearer token
//! authentication.

use std::time::Duration;

use notedrop_protocol::constants::{CHUNK_HASH_HEADER, PROTOCOL_VERSION};
use notedrop_protocol::messages::{
    CancelUploadResponse, CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest,
    InitUploadResponse, UploadChunkHeader, UploadChunkResponse, UploadProgressResponse,
};
use notedrop_uploader::{RemoteError, RemoteErrorKind, RemoteFuture, RemoteStore};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::classify::{classify_reqwest, classify_status};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`PROTOCOL_HEADER`](notedrop_protocol::constants::PROTOCOL_HEADER) in the
/// lowercase form `http` requires.
const PROTOCOL_HEADER_NAME: HeaderName = HeaderName::from_static("x-notedrop-protocol");

/// Characters escaped in a session id path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Errors building an [`HttpStore`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid API token")]
    InvalidToken,

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

/// [`RemoteStore`] over HTTP.
pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpStore {
    /// Creates a client for the backend at `base_url`.
    pub fn new(base_url: &str, api_token: Option<&str>) -> Result<Self, ClientError> {
        let parsed =
            reqwest::Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(PROTOCOL_HEADER_NAME, HeaderValue::from(PROTOCOL_VERSION));
        if let Some(token) = api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The backend root every request is relative to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, session_id: &str) -> String {
        let encoded = utf8_percent_encode(session_id, PATH_SEGMENT);
        format!("{}/uploads/{encoded}", self.base_url)
    }

    /// Sends `request` and decodes a JSON success body.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let resp = request.send().await.map_err(classify_reqwest)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(classify_reqwest)?;

        if !status.is_success() {
            let err = classify_status(status.as_u16(), &body);
            debug!(status = status.as_u16(), kind = %err.kind, "backend refused request");
            return Err(err);
        }

        serde_json::from_slice(&body).map_err(|e| {
            RemoteError::new(
                RemoteErrorKind::InvalidResponse,
                format!("undecodable {status} body: {e}"),
            )
        })
    }
}

impl RemoteStore for HttpStore {
    fn init_upload(&self, req: &InitUploadRequest) -> RemoteFuture<'_, InitUploadResponse> {
        let request = self
            .http
            .post(format!("{}/uploads", self.base_url))
            .json(req);
        Box::pin(self.send(request))
    }

    fn upload_chunk(
        &self,
        header: &UploadChunkHeader,
        data: Vec<u8>,
    ) -> RemoteFuture<'_, UploadChunkResponse> {
        let url = format!(
            "{}/chunks/{}",
            self.session_url(&header.session_id),
            header.chunk_index
        );
        let request = self
            .http
            .put(url)
            .header(CHUNK_HASH_HEADER, header.chunk_hash.as_str())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        Box::pin(self.send(request))
    }

    fn query_progress(&self, session_id: &str) -> RemoteFuture<'_, UploadProgressResponse> {
        let request = self.http.get(self.session_url(session_id));
        Box::pin(self.send(request))
    }

    fn complete_upload(
        &self,
        session_id: &str,
        req: &CompleteUploadRequest,
    ) -> RemoteFuture<'_, CompleteUploadResponse> {
        let request = self
            .http
            .post(format!("{}/complete", self.session_url(session_id)))
            .json(req);
        Box::pin(self.send(request))
    }

    fn cancel_upload(&self, session_id: &str) -> RemoteFuture<'_, CancelUploadResponse> {
        let request = self.http.delete(self.session_url(session_id));
        Box::pin(self.send(request))
    }
}
