//! Retry budgets and backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay, before jitter.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Fraction of the delay randomly added or removed (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 15_000,
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_delay_ms as f64 * self.factor.max(1.0).powi(exp);
        let capped = millis.min(self.max_delay_ms as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let offset = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        let micros = (capped * (1.0 + offset) * 1000.0).max(0.0).round();
        Duration::from_micros(micros as u64)
    }
}

/// Retry budgets for both strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Standard: attempts per chunk, retried immediately.
    pub max_attempts: u32,
    /// Intelligent Ingestion: delay schedule between attempts.
    pub backoff: BackoffConfig,
    /// Intelligent Ingestion: time budget for one chunk, measured from its first attempt.
    pub max_retry_duration_ms: u64,
    /// Intelligent Ingestion: chunks are never shrunk below this size.
    pub min_chunk_size: u64,
    /// Intelligent Ingestion: attempts allowed once the chunk is at `min_chunk_size`.
    pub max_attempts_at_min: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            max_retry_duration_ms: 120_000,
            min_chunk_size: 32 * 1024,
            max_attempts_at_min: 3,
        }
    }
}

impl RetryConfig {
    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_millis(self.max_retry_duration_ms)
    }
}

/// Sleeps for `delay`, returning early with [`UploadError::Cancelled`].
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
