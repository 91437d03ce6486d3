//! Uploader tuning knobs.

use std::time::Duration;

use notedrop_protocol::constants;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::transport::RetryPolicy;

/// Tuning for chunk size, concurrency, retries and deadlines.
///
/// Deserializes from the `[upload]` table of the CLI config; every field
/// has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    #[serde(default = "default_complete_timeout_secs")]
    pub complete_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_chunk_size() -> u64 {
    constants::DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    constants::DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    constants::DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    constants::DEFAULT_RETRY_BASE_DELAY.as_millis() as u64
}

fn default_chunk_timeout_secs() -> u64 {
    constants::CHUNK_REQUEST_TIMEOUT.as_secs()
}

fn default_complete_timeout_secs() -> u64 {
    constants::COMPLETE_REQUEST_TIMEOUT.as_secs()
}

fn default_request_timeout_secs() -> u64 {
    constants::CONTROL_REQUEST_TIMEOUT.as_secs()
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            complete_timeout_secs: default_complete_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl UploaderConfig {
    /// Rejects settings that cannot drive an upload.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfig("concurrency must be positive".into()));
        }
        if self.chunk_timeout_secs == 0
            || self.complete_timeout_secs == 0
            || self.request_timeout_secs == 0
        {
            return Err(UploadError::InvalidConfig("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Deadline for a single chunk upload attempt.
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    /// Deadline for the completion call (assembly and verification are slow).
    pub fn complete_timeout(&self) -> Duration {
        Duration::from_secs(self.complete_timeout_secs)
    }

    /// Deadline for init, progress and cancel calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = UploaderConfig::default();
        assert_eq!(cfg.chunk_size, 4 * 1024 * 1024);
        assert_eq!(cfg.concurrency, 3);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_policy().base_delay, Duration::from_secs(1));
        assert_eq!(cfg.chunk_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.complete_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: UploaderConfig = serde_json::from_str(r#"{"concurrency": 5}"#).unwrap();
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.chunk_size, UploaderConfig::default().chunk_size);
    }

    #[test]
    fn zero_values_rejected() {
        let cfg = UploaderConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(UploadError::InvalidConfig(_))));

        let cfg = UploaderConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(UploadError::InvalidConfig(_))));

        let cfg = UploaderConfig {
            complete_timeout_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
