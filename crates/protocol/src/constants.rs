use std::time::Duration;

/// Protocol version advertised in the `X-Notedrop-Protocol` header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Header carrying the protocol version.
pub const PROTOCOL_HEADER: &str = "X-Notedrop-Protocol";

/// Header carrying the SHA-256 hex digest of a chunk body.
pub const CHUNK_HASH_HEADER: &str = "X-Chunk-Hash";

/// Default chunk size: 4 MiB.
///
/// Fixed for the lifetime of a session; the backend learns it at init time
/// and uses it to validate chunk boundaries.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of chunk uploads allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default number of additional attempts per chunk after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for linear-exponential chunk retry backoff (`attempt * base`).
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Timeout for a single chunk upload attempt.
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the completion handshake.
///
/// Server-side assembly of many chunks is itself costly, so this is much
/// longer than a chunk attempt.
pub const COMPLETE_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for the small control requests (init, progress, cancel).
pub const CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
