//! Remote store trait.
//!
//! `RemoteStore` is implemented by the HTTP client in `notedrop-store-client`.
//! Upload logic only sees this trait, so it runs against in-memory stores in
//! tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use notedrop_protocol::messages::{
    CancelUploadResponse, CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest,
    InitUploadResponse, UploadChunkHeader, UploadChunkResponse, UploadProgressResponse,
};

use crate::error::RemoteError;

/// Boxed future returned by every [`RemoteStore`] call.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Abstract upload backend.
///
/// Request arguments are borrowed only for the call itself; implementations
/// copy what they need before returning the future.
pub trait RemoteStore: Send + Sync {
    /// Opens a session for a planned file.
    fn init_upload(&self, req: &InitUploadRequest) -> RemoteFuture<'_, InitUploadResponse>;

    /// Sends one chunk with its digest.
    fn upload_chunk(
        &self,
        header: &UploadChunkHeader,
        data: Vec<u8>,
    ) -> RemoteFuture<'_, UploadChunkResponse>;

    /// Asks which chunks of a session the backend still lacks.
    fn query_progress(&self, session_id: &str) -> RemoteFuture<'_, UploadProgressResponse>;

    /// Asks the backend to assemble and verify the file.
    fn complete_upload(
        &self,
        session_id: &str,
        req: &CompleteUploadRequest,
    ) -> RemoteFuture<'_, CompleteUploadResponse>;

    /// Releases a session's server-side resources.
    fn cancel_upload(&self, session_id: &str) -> RemoteFuture<'_, CancelUploadResponse>;
}

/// Runs `call` with a deadline, mapping expiry to a retryable timeout.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: RemoteFuture<'_, T>,
) -> Result<T, RemoteError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(limit)),
    }
}
