//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use fsmpu_protocol::constants::DEFAULT_API_BASE;
use fsmpu_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_PART_SIZE, TransferError, validate_concurrency};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::retry::RetryConfig;

/// Default number of parts uploaded concurrently.
pub const DEFAULT_PART_CONCURRENCY: usize = 5;

/// Default number of chunks uploaded concurrently within one part.
pub const DEFAULT_CHUNK_CONCURRENCY: usize = 8;

/// Polling of a finalize call that the server accepted but has not finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletePollConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for CompletePollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1_000,
        }
    }
}

impl CompletePollConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Tunables shared by every upload started from one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub api_base: String,
    pub part_size: u64,
    pub chunk_size: u64,
    pub part_concurrency: usize,
    pub chunk_concurrency: usize,
    pub use_intelligent_ingestion: bool,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub complete_poll: CompletePollConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            part_size: DEFAULT_PART_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
            chunk_concurrency: DEFAULT_CHUNK_CONCURRENCY,
            use_intelligent_ingestion: true,
            request_timeout_ms: 60_000,
            retry: RetryConfig::default(),
            complete_poll: CompletePollConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a malformed one is logged and
    /// also falls back to the defaults. Omitted fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        if !path.exists() {
            debug!(path = %path.display(), "no engine config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<EngineConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse engine config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.part_size == 0 {
            return Err(invalid("part size must be greater than zero"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk size must be greater than zero"));
        }
        validate_concurrency("part concurrency", self.part_concurrency)?;
        validate_concurrency("chunk concurrency", self.chunk_concurrency)?;
        if self.request_timeout_ms == 0 {
            return Err(invalid("request timeout must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry attempts must be at least 1"));
        }
        if self.retry.min_chunk_size == 0 {
            return Err(invalid("minimum chunk size must be greater than zero"));
        }
        if self.complete_poll.max_attempts == 0 {
            return Err(invalid("finalize poll attempts must be at least 1"));
        }
        if reqwest::Url::parse(&self.api_base).is_err() {
            return Err(invalid(&format!("invalid API base URL: {}", self.api_base)));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> UploadError {
    TransferError::InvalidConfig(msg.to_string()).into()
}
