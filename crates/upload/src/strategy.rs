//! Upload strategies: Standard and Intelligent Ingestion.
//!
//! A strategy decides how one chunk transmission is judged (acknowledged,
//! retried over some range after some delay, or failed for good), how a
//! fully acknowledged part is closed, and how the session is finalized.
//! The chunk and part uploaders are strategy-agnostic; they act on the
//! [`ChunkOutcome`] they get back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fsmpu_protocol::{RetryDirective, parts_param};
use fsmpu_transfer::{ByteRange, Chunk, Part, PartToken};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiClient, Session};
use crate::error::UploadError;
use crate::retry::{BackoffConfig, RetryConfig};

/// One transmission attempt of a chunk.
pub struct ChunkRequest<'a> {
    pub session: &'a Session,
    pub part: Part,
    pub chunk: &'a Chunk,
    /// Attempt number at the current chunk size, starting at 1.
    pub attempt: u32,
    /// Failed attempts so far for the enclosing chunk, across resizes.
    pub failures: u32,
    /// When the first attempt for the enclosing chunk was made.
    pub started: Instant,
    pub cancel: &'a CancellationToken,
}

/// Server acknowledgment of a chunk range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    pub range: ByteRange,
    pub etag: Option<String>,
}

/// Verdict on one transmission attempt.
#[derive(Debug)]
pub enum ChunkOutcome {
    Ack(ChunkAck),
    /// Try again after `delay` over `range`: absolute, starting at the attempted
    /// chunk's offset and no longer than it.
    Retry { range: ByteRange, delay: Duration },
    Fail(UploadError),
}

/// Standard: fixed chunks, immediate retries, ETags listed at finalize.
pub struct StandardStrategy {
    api: Arc<ApiClient>,
    max_attempts: u32,
}

/// Intelligent Ingestion: backoff, server-directed or self-degrading chunk
/// sizes, per-part commits.
pub struct IntelligentStrategy {
    api: Arc<ApiClient>,
    backoff: BackoffConfig,
    max_retry_duration: Duration,
    min_chunk_size: u64,
    max_attempts_at_min: u32,
}

/// The strategy a job runs under, chosen once per session.
pub enum UploadStrategy {
    Standard(StandardStrategy),
    IntelligentIngestion(IntelligentStrategy),
}

impl UploadStrategy {
    /// Picks Intelligent Ingestion only if it was requested and the server granted it.
    pub fn select(
        requested_intelligent: bool,
        session: &Session,
        api: Arc<ApiClient>,
        retry: &RetryConfig,
    ) -> Self {
        if requested_intelligent && session.intelligent {
            return Self::IntelligentIngestion(IntelligentStrategy {
                api,
                backoff: retry.backoff.clone(),
                max_retry_duration: retry.max_retry_duration(),
                min_chunk_size: retry.min_chunk_size.max(1),
                max_attempts_at_min: retry.max_attempts_at_min.max(1),
            });
        }
        if requested_intelligent {
            warn!(
                upload_id = %session.upload_id,
                "intelligent ingestion not granted, falling back to standard upload"
            );
        }
        Self::Standard(StandardStrategy {
            api,
            max_attempts: retry.max_attempts.max(1),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard(_) => "standard",
            Self::IntelligentIngestion(_) => "intelligent_ingestion",
        }
    }

    pub fn is_intelligent(&self) -> bool {
        matches!(self, Self::IntelligentIngestion(_))
    }

    /// Initial chunk size: the server's suggestion wins under Intelligent Ingestion.
    pub fn chunk_size(&self, configured: u64, session: &Session) -> u64 {
        match self {
            Self::Standard(_) => configured,
            Self::IntelligentIngestion(_) => session.chunk_size.unwrap_or(configured),
        }
    }

    /// Standard sessions must be discarded explicitly after a failure.
    pub fn requires_abort(&self) -> bool {
        matches!(self, Self::Standard(_))
    }

    /// Progress is counted per acknowledged range, in offset order, under Standard.
    pub fn ordered_progress(&self) -> bool {
        matches!(self, Self::Standard(_))
    }

    /// Transmits one chunk and judges the result.
    pub async fn upload_chunk(&self, req: ChunkRequest<'_>) -> ChunkOutcome {
        match self {
            Self::Standard(s) => s.upload_chunk(req).await,
            Self::IntelligentIngestion(s) => s.upload_chunk(req).await,
        }
    }

    /// Closes a part whose chunks all acknowledged, in offset order.
    pub async fn complete_part(
        &self,
        session: &Session,
        part: Part,
        acks: &[ChunkAck],
        cancel: &CancellationToken,
    ) -> Result<PartToken, UploadError> {
        match self {
            Self::Standard(_) => {
                // The backend returns the part's ETag on the PUT that closes the part.
                let last = acks
                    .last()
                    .filter(|ack| ack.range.end() == part.range.end())
                    .ok_or_else(|| {
                        UploadError::Protocol(format!("part {} has no closing chunk", part.seq))
                    })?;
                let etag = last.etag.clone().ok_or_else(|| {
                    UploadError::Protocol(format!("part {} closed without an ETag", part.seq))
                })?;
                Ok(PartToken::ETag(etag))
            }
            Self::IntelligentIngestion(s) => {
                s.api
                    .commit(session, part.seq, part.range.len, cancel)
                    .await?;
                Ok(PartToken::Committed)
            }
        }
    }

    /// Finalize fields: the `parts` list under Standard, `multipart` under
    /// Intelligent Ingestion.
    pub fn finalize_params(&self, tokens: &BTreeMap<u32, PartToken>) -> (Option<String>, bool) {
        match self {
            Self::Standard(_) => {
                let etags: Vec<(u32, &str)> = tokens
                    .iter()
                    .filter_map(|(seq, token)| match token {
                        PartToken::ETag(etag) => Some((*seq, etag.as_str())),
                        PartToken::Committed => None,
                    })
                    .collect();
                (Some(parts_param(&etags)), false)
            }
            Self::IntelligentIngestion(_) => (None, true),
        }
    }
}

impl StandardStrategy {
    async fn upload_chunk(&self, req: ChunkRequest<'_>) -> ChunkOutcome {
        let result = self
            .api
            .send_chunk(req.session, req.part.range.offset, req.chunk, false, req.cancel)
            .await;

        let err = match result {
            Ok(Some(etag)) => {
                return ChunkOutcome::Ack(ChunkAck {
                    range: req.chunk.range,
                    etag: Some(etag),
                });
            }
            Ok(None) => UploadError::Protocol("chunk PUT returned no ETag".into()),
            Err(UploadError::Cancelled) => return ChunkOutcome::Fail(UploadError::Cancelled),
            Err(e) => e,
        };

        if req.attempt >= self.max_attempts {
            return ChunkOutcome::Fail(err);
        }
        warn!(
            part = req.part.seq,
            offset = req.chunk.range.offset,
            attempt = req.attempt,
            error = %err,
            "chunk failed, retrying"
        );
        ChunkOutcome::Retry {
            range: req.chunk.range,
            delay: Duration::ZERO,
        }
    }
}

impl IntelligentStrategy {
    async fn upload_chunk(&self, req: ChunkRequest<'_>) -> ChunkOutcome {
        let result = self
            .api
            .send_chunk(req.session, req.part.range.offset, req.chunk, true, req.cancel)
            .await;

        let err = match result {
            Ok(etag) => {
                return ChunkOutcome::Ack(ChunkAck {
                    range: req.chunk.range,
                    etag,
                });
            }
            Err(UploadError::Cancelled) => return ChunkOutcome::Fail(UploadError::Cancelled),
            Err(e) => e,
        };

        let range = req.chunk.range;
        if req.started.elapsed() >= self.max_retry_duration {
            return ChunkOutcome::Fail(err);
        }
        // Exhausted at the floor, whatever the server suggests next.
        if range.len <= self.min_chunk_size && req.attempt >= self.max_attempts_at_min {
            return ChunkOutcome::Fail(err);
        }

        let backoff = self.backoff.delay_for_attempt(req.failures + 1);

        if let Some(directive) = err.response_body().and_then(RetryDirective::from_value) {
            match directive_range(req.part, range, &directive) {
                Some(next) => {
                    let delay = directive
                        .delay_ms
                        .map(Duration::from_millis)
                        .unwrap_or(backoff);
                    debug!(
                        part = req.part.seq,
                        offset = range.offset,
                        next = %next,
                        delay_ms = delay.as_millis() as u64,
                        "server requested retry"
                    );
                    return ChunkOutcome::Retry { range: next, delay };
                }
                None => warn!(
                    part = req.part.seq,
                    offset = directive.offset,
                    size = directive.size,
                    "ignoring retry directive outside the failed chunk"
                ),
            }
        }

        // No usable directive: shrink the chunk ourselves until the floor.
        if range.len > self.min_chunk_size {
            let len = (range.len / 2).max(self.min_chunk_size);
            warn!(
                part = req.part.seq,
                offset = range.offset,
                from = range.len,
                to = len,
                error = %err,
                "chunk failed, retrying smaller"
            );
            return ChunkOutcome::Retry {
                range: ByteRange::new(range.offset, len),
                delay: backoff,
            };
        }

        warn!(
            part = req.part.seq,
            offset = range.offset,
            attempt = req.attempt,
            error = %err,
            "chunk failed at minimum size, retrying"
        );
        ChunkOutcome::Retry {
            range,
            delay: backoff,
        }
    }
}

/// Converts a part-relative directive to an absolute range, if it is usable.
///
/// The retry must restart at the failed chunk's offset and stay inside it,
/// so a resize can never skip or duplicate bytes.
fn directive_range(part: Part, attempted: ByteRange, directive: &RetryDirective) -> Option<ByteRange> {
    if directive.size == 0 {
        return None;
    }
    let offset = part.range.offset.checked_add(directive.offset)?;
    let next = ByteRange::new(offset, directive.size);
    (next.offset == attempted.offset && attempted.contains(&next)).then_some(next)
}
