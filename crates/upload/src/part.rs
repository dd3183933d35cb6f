//! Part uploader: runs a part's chunks concurrently and closes the part.

use std::collections::BTreeMap;
use std::sync::Arc;

use fsmpu_transfer::{Part, PartToken, split_range};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunk;
use crate::coordinator::JobContext;
use crate::error::UploadError;
use crate::strategy::ChunkAck;

// ---------------------------------------------------------------------------
// SequenceGate
// ---------------------------------------------------------------------------

/// Applies chunk acknowledgments of one part in ascending offset order.
///
/// Acks arriving ahead of the contiguous prefix are buffered until the gap
/// before them is filled.
#[derive(Debug)]
pub(crate) struct SequenceGate {
    next: u64,
    pending: BTreeMap<u64, ChunkAck>,
    applied: Vec<ChunkAck>,
}

impl SequenceGate {
    pub(crate) fn new(start: u64) -> Self {
        Self {
            next: start,
            pending: BTreeMap::new(),
            applied: Vec::new(),
        }
    }

    /// Buffers `ack` and returns the number of bytes newly applied.
    pub(crate) fn push(&mut self, ack: ChunkAck) -> u64 {
        self.pending.insert(ack.range.offset, ack);
        let mut bytes = 0;
        while let Some(ack) = self.pending.remove(&self.next) {
            self.next = ack.range.end();
            bytes += ack.range.len;
            self.applied.push(ack);
        }
        bytes
    }

    /// Returns `true` once every byte up to `end` has been applied.
    pub(crate) fn is_complete(&self, end: u64) -> bool {
        self.pending.is_empty() && self.next == end
    }

    pub(crate) fn applied(&self) -> &[ChunkAck] {
        &self.applied
    }
}

// ---------------------------------------------------------------------------
// PartUploader
// ---------------------------------------------------------------------------

/// Uploads every chunk of `part` and returns its token.
///
/// Updates the part's entry in the job tracker on entry and exit.
pub(crate) async fn upload_part(ctx: Arc<JobContext>, part: Part) -> Result<PartToken, UploadError> {
    ctx.tracker.start(part.seq);
    debug!(part = part.seq, range = %part.range, "part started");

    let result = run_part(&ctx, part).await;
    match &result {
        Ok(_) => {
            ctx.tracker.complete(part.seq);
            debug!(part = part.seq, "part completed");
        }
        Err(e) => {
            ctx.tracker.fail(part.seq);
            if !e.is_cancelled() {
                warn!(part = part.seq, error = %e, "part failed");
            }
        }
    }
    result
}

/// Collects chunk results of one part.
struct ChunkResults<'a> {
    ctx: &'a JobContext,
    part: Part,
    gate: SequenceGate,
    first_error: Option<UploadError>,
    cancel: CancellationToken,
}

impl ChunkResults<'_> {
    fn absorb(&mut self, joined: Result<Result<ChunkAck, UploadError>, JoinError>) {
        match joined {
            Ok(Ok(ack)) => {
                let applied = self.gate.push(ack);
                if self.ctx.strategy.ordered_progress() && applied > 0 {
                    self.ctx.progress.add(applied);
                    self.ctx.tracker.add_sent(self.part.seq, applied);
                }
            }
            Ok(Err(UploadError::Cancelled)) => {}
            Ok(Err(e)) => self.record(e),
            Err(e) => self.record(UploadError::Task(format!("chunk task join error: {e}"))),
        }
    }

    /// Keeps the first failure that happened before any cancellation and
    /// stops the part's other chunks.
    fn record(&mut self, err: UploadError) {
        if self.first_error.is_none() && !self.cancel.is_cancelled() {
            self.first_error = Some(err);
        }
        self.cancel.cancel();
    }
}

async fn run_part(ctx: &Arc<JobContext>, part: Part) -> Result<PartToken, UploadError> {
    // Child of the job token: job cancellation reaches the chunks, and a
    // chunk failure stops only this part's siblings.
    let cancel = ctx.cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(ctx.chunk_concurrency));
    let mut join_set = JoinSet::new();
    let mut results = ChunkResults {
        ctx: ctx.as_ref(),
        part,
        gate: SequenceGate::new(part.range.offset),
        first_error: None,
        cancel: cancel.clone(),
    };

    for range in split_range(part.range, ctx.chunk_size) {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        while let Some(joined) = join_set.try_join_next() {
            results.absorb(joined);
        }
        if cancel.is_cancelled() {
            break;
        }

        let ctx = Arc::clone(ctx);
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let _permit = permit;
            chunk::upload_chunk(&ctx, part, range, &cancel).await
        });
    }

    while let Some(joined) = join_set.join_next().await {
        results.absorb(joined);
    }

    if let Some(err) = results.first_error {
        return Err(UploadError::PartFailed {
            part: part.seq,
            source: Box::new(err),
        });
    }
    if ctx.cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    if !results.gate.is_complete(part.range.end()) {
        return Err(UploadError::Protocol(format!(
            "part {} finished with unacknowledged bytes",
            part.seq
        )));
    }

    ctx.strategy
        .complete_part(&ctx.session, part, results.gate.applied(), &ctx.cancel)
        .await
}
