//! Upload coordinator: owns one job from session start to finalize.
//!
//! # Pipeline
//!
//! 1. **Layout**: split the source into parts (no network yet)
//! 2. **Start**: open the session and pick the strategy
//! 3. **Parts**: upload parts concurrently, each with concurrent chunks
//! 4. **Finalize**: close the session with every part's token
//!
//! The first permanent failure cancels every other worker. Standard
//! sessions are then aborted on a best-effort basis.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use fsmpu_protocol::StorageOptions;
use fsmpu_transfer::{
    ChunkReader, Part, PartLayout, PartToken, PartTracker, ProgressAggregator, ProgressCallback,
    ProgressReporter, validate_concurrency, validate_source,
};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ApiClient, FileInfo, Session};
use crate::error::UploadError;
use crate::part;
use crate::retry::RetryConfig;
use crate::strategy::UploadStrategy;

/// What a terminal upload looks like to the caller.
#[derive(Debug)]
pub enum UploadResult {
    /// The server stored the file; `response` is its finalize payload.
    Completed { response: serde_json::Value },
    /// The job failed; `response` is the server payload behind the failure, if any.
    Failed {
        error: UploadError,
        response: Option<serde_json::Value>,
    },
    /// The caller cancelled the job.
    Cancelled,
}

impl UploadResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A validated upload request.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub path: PathBuf,
    pub file: FileInfo,
    pub part_size: u64,
    pub chunk_size: u64,
    pub part_concurrency: usize,
    pub chunk_concurrency: usize,
    pub intelligent_ingestion: bool,
}

impl UploadJob {
    /// Checks the job's inputs. Never touches the network.
    pub fn validate(&self) -> Result<(), UploadError> {
        let len = validate_source(&self.path)?;
        if len != self.file.size {
            return Err(UploadError::Protocol(format!(
                "source changed size: expected {} bytes, found {len}",
                self.file.size
            )));
        }
        validate_concurrency("part concurrency", self.part_concurrency)?;
        validate_concurrency("chunk concurrency", self.chunk_concurrency)?;
        PartLayout::compute(self.file.size, self.part_size)?;
        if self.chunk_size == 0 {
            return Err(
                fsmpu_transfer::TransferError::InvalidConfig("chunk size must be greater than zero".into())
                    .into(),
            );
        }
        Ok(())
    }

    pub(crate) fn with_store(mut self, store: StorageOptions) -> Self {
        self.file.store = store;
        self
    }
}

/// State shared by every worker of one job.
pub(crate) struct JobContext {
    pub(crate) strategy: UploadStrategy,
    pub(crate) session: Session,
    pub(crate) reader: ChunkReader,
    pub(crate) progress: ProgressReporter,
    pub(crate) tracker: PartTracker,
    pub(crate) chunk_size: u64,
    pub(crate) chunk_concurrency: usize,
    /// Job-wide token: cancelled by the caller or on the first permanent failure.
    pub(crate) cancel: CancellationToken,
}

/// Runs `job` to a terminal result.
///
/// `external` is the caller's token. The job works under a child of it so
/// that a failure can stop the workers without being mistaken for a
/// caller cancellation.
pub(crate) async fn run(
    job: UploadJob,
    api: Arc<ApiClient>,
    retry: RetryConfig,
    progress: Option<ProgressCallback>,
    external: CancellationToken,
) -> UploadResult {
    let job_cancel = external.child_token();
    let (aggregator, reporter) = ProgressAggregator::spawn(job.file.size, progress);

    let outcome = execute(&job, api, &retry, reporter, &job_cancel).await;
    // Every reporter is gone once `execute` returns, so this drains the
    // last increments before the result is published.
    let sent = aggregator.finish().await;

    match outcome {
        Ok(response) => {
            info!(bytes = sent, "upload completed");
            UploadResult::Completed { response }
        }
        Err(error) if error.is_cancelled() => {
            info!(bytes = sent, "upload cancelled");
            UploadResult::Cancelled
        }
        Err(error) => {
            error!(bytes = sent, error = %error, "upload failed");
            let response = error.response_body().cloned();
            UploadResult::Failed { error, response }
        }
    }
}

async fn execute(
    job: &UploadJob,
    api: Arc<ApiClient>,
    retry: &RetryConfig,
    progress: ProgressReporter,
    cancel: &CancellationToken,
) -> Result<serde_json::Value, UploadError> {
    let layout = PartLayout::compute(job.file.size, job.part_size)?;
    let reader = ChunkReader::new(&job.path)?;
    check_cancelled(cancel)?;

    let session = api.start(&job.file, job.intelligent_ingestion, cancel).await?;
    let strategy =
        UploadStrategy::select(job.intelligent_ingestion, &session, Arc::clone(&api), retry);
    let chunk_size = strategy.chunk_size(job.chunk_size, &session);
    info!(
        upload_id = %session.upload_id,
        strategy = strategy.name(),
        parts = layout.len(),
        part_size = job.part_size,
        chunk_size,
        "uploading parts"
    );

    let ctx = Arc::new(JobContext {
        strategy,
        session: session.clone(),
        reader,
        progress,
        tracker: PartTracker::new(layout.parts()),
        chunk_size,
        chunk_concurrency: job.chunk_concurrency,
        cancel: cancel.clone(),
    });

    let parts = upload_parts(&ctx, layout.parts(), job.part_concurrency).await;
    let tokens = match parts {
        Ok(tokens) => tokens,
        Err(e) => {
            if ctx.strategy.requires_abort() {
                abort_session(&api, &session).await;
            }
            return Err(e);
        }
    };

    ensure_complete(&ctx.tracker, &tokens, layout.len(), job.file.size)?;

    let (parts_field, intelligent) = ctx.strategy.finalize_params(&tokens);
    // Drops the last progress reporter.
    drop(ctx);

    api.complete(&session, &job.file, parts_field, intelligent, cancel)
        .await
}

/// Collects part results of one job.
struct PartResults {
    tokens: BTreeMap<u32, PartToken>,
    first_error: Option<UploadError>,
    cancel: CancellationToken,
}

impl PartResults {
    fn absorb(&mut self, joined: Result<(u32, Result<PartToken, UploadError>), JoinError>) {
        match joined {
            Ok((seq, Ok(token))) => {
                self.tokens.insert(seq, token);
            }
            Ok((_, Err(UploadError::Cancelled))) => {}
            Ok((_, Err(e))) => self.record(e),
            Err(e) => self.record(UploadError::Task(format!("part task join error: {e}"))),
        }
    }

    /// Keeps the first failure that happened before any cancellation.
    fn record(&mut self, err: UploadError) {
        if self.first_error.is_none() && !self.cancel.is_cancelled() {
            self.first_error = Some(err);
        }
        self.cancel.cancel();
    }
}

/// Dispatches parts in sequence order, at most `concurrency` at a time.
async fn upload_parts(
    ctx: &Arc<JobContext>,
    parts: &[Part],
    concurrency: usize,
) -> Result<BTreeMap<u32, PartToken>, UploadError> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut join_set = JoinSet::new();
    let mut results = PartResults {
        tokens: BTreeMap::new(),
        first_error: None,
        cancel: ctx.cancel.clone(),
    };

    for &part in parts {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        while let Some(joined) = join_set.try_join_next() {
            results.absorb(joined);
        }
        if ctx.cancel.is_cancelled() {
            break;
        }

        let ctx = Arc::clone(ctx);
        join_set.spawn(async move {
            let _permit = permit;
            (part.seq, part::upload_part(ctx, part).await)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        results.absorb(joined);
    }

    if let Some(err) = results.first_error {
        return Err(err);
    }
    check_cancelled(&ctx.cancel)?;
    Ok(results.tokens)
}

/// Refuses to finalize unless every part completed and together they
/// cover the whole file.
fn ensure_complete(
    tracker: &PartTracker,
    tokens: &BTreeMap<u32, PartToken>,
    parts: usize,
    file_len: u64,
) -> Result<(), UploadError> {
    let completed = tracker.completed_bytes();
    if !tracker.all_completed() || tokens.len() != parts || completed != file_len {
        return Err(UploadError::Protocol(format!(
            "finalize attempted with incomplete parts: {completed} of {file_len} bytes, {} of {parts} tokens",
            tokens.len()
        )));
    }
    Ok(())
}

async fn abort_session(api: &ApiClient, session: &Session) {
    // The job token may already be cancelled; the abort runs on its own.
    match api.abort(session, &CancellationToken::new()).await {
        Ok(()) => info!(upload_id = %session.upload_id, "session aborted"),
        Err(e) => warn!(upload_id = %session.upload_id, error = %e, "failed to abort session"),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Cancelled)
    } else {
        Ok(())
    }
}
