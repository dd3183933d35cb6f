//! Chunk uploader: drives one chunk range through the strategy.

use fsmpu_transfer::{ByteRange, Chunk, ChunkReader, Part};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coordinator::JobContext;
use crate::error::UploadError;
use crate::retry::sleep_or_cancel;
use crate::strategy::{ChunkAck, ChunkOutcome, ChunkRequest};

/// Uploads `range` of `part`, retrying and resizing as the strategy decides.
///
/// The range may end up transmitted as several smaller pieces when the
/// strategy shrinks it; once shrunk, the remaining pieces keep the smaller
/// size. The returned acknowledgment covers the whole range and carries
/// the ETag of its last piece.
pub(crate) async fn upload_chunk(
    ctx: &JobContext,
    part: Part,
    range: ByteRange,
    cancel: &CancellationToken,
) -> Result<ChunkAck, UploadError> {
    let report_directly = !ctx.strategy.ordered_progress();
    let started = Instant::now();

    let mut cursor = range.offset;
    let mut piece_len = range.len;
    let mut attempt: u32 = 0;
    let mut failures: u32 = 0;
    let mut etag = None;

    while cursor < range.end() {
        check_cancelled(cancel)?;

        let piece = ByteRange::new(cursor, piece_len.min(range.end() - cursor));
        let chunk = read_piece(&ctx.reader, part.seq, piece).await?;
        attempt += 1;

        let outcome = ctx
            .strategy
            .upload_chunk(ChunkRequest {
                session: &ctx.session,
                part,
                chunk: &chunk,
                attempt,
                failures,
                started,
                cancel,
            })
            .await;

        match outcome {
            ChunkOutcome::Ack(ack) => {
                debug!(part = part.seq, range = %piece, attempt, "chunk acknowledged");
                if report_directly {
                    ctx.progress.add(piece.len);
                    ctx.tracker.add_sent(part.seq, piece.len);
                }
                cursor = piece.end();
                attempt = 0;
                etag = ack.etag;
            }
            ChunkOutcome::Retry { range: next, delay } => {
                failures += 1;
                if next.offset != piece.offset || next.is_empty() || next.len > piece.len {
                    return Err(UploadError::Protocol(format!(
                        "retry range {next} does not restart chunk {piece}"
                    )));
                }
                sleep_or_cancel(delay, cancel).await?;
                if next.len != piece.len {
                    attempt = 0;
                }
                piece_len = next.len;
            }
            ChunkOutcome::Fail(UploadError::Cancelled) => return Err(UploadError::Cancelled),
            ChunkOutcome::Fail(e) => {
                return Err(UploadError::ChunkFailed {
                    part: part.seq,
                    range: piece,
                    attempts: failures + 1,
                    source: Box::new(e),
                });
            }
        }
    }

    Ok(ChunkAck { range, etag })
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reads and checksums one piece off the async runtime.
async fn read_piece(reader: &ChunkReader, part: u32, range: ByteRange) -> Result<Chunk, UploadError> {
    let reader = reader.clone();
    let chunk = tokio::task::spawn_blocking(move || reader.read_chunk(part, range))
        .await
        .map_err(|e| UploadError::Task(format!("read task join error: {e}")))??;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fsmpu_transfer::{PartTracker, ProgressAggregator};
    use tempfile::TempDir;

    use crate::api::{ApiClient, FileInfo};
    use crate::strategy::UploadStrategy;
    use crate::testing::{MockServer, into_transport, json, source_file, test_config};

    const LEN: u64 = 64 * 1024;

    async fn context(
        server: MockServer,
        intelligent: bool,
        dir: &TempDir,
    ) -> (Arc<MockServer>, JobContext, ProgressAggregator, Part) {
        let path = source_file(dir, "src.bin", LEN as usize);
        let (server, transport) = into_transport(server);
        let config = test_config(LEN, 16 * 1024);
        let api = Arc::new(ApiClient::new(transport, &config, "KEY", None));
        let file = FileInfo {
            filename: "src.bin".into(),
            mimetype: "application/octet-stream".into(),
            size: LEN,
            store: Default::default(),
        };
        let session = api
            .start(&file, intelligent, &CancellationToken::new())
            .await
            .unwrap();
        let strategy = UploadStrategy::select(intelligent, &session, api, &config.retry);

        let part = Part {
            seq: 1,
            range: ByteRange::new(0, LEN),
        };
        let (aggregator, progress) = ProgressAggregator::spawn(LEN, None);
        let ctx = JobContext {
            strategy,
            session,
            reader: ChunkReader::new(&path).unwrap(),
            progress,
            tracker: PartTracker::new(&[part]),
            chunk_size: 16 * 1024,
            chunk_concurrency: 2,
            cancel: CancellationToken::new(),
        };
        (server, ctx, aggregator, part)
    }

    #[tokio::test]
    async fn standard_chunk_succeeds_first_try() {
        let dir = TempDir::new().unwrap();
        let (server, ctx, aggregator, part) = context(MockServer::default(), false, &dir).await;

        let range = ByteRange::new(16 * 1024, 16 * 1024);
        let ack = upload_chunk(&ctx, part, range, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ack.range, range);
        assert_eq!(ack.etag.as_deref(), Some("\"etag-1-16384\""));
        assert_eq!(server.stored_ranges(1), vec![(16 * 1024, 16 * 1024)]);

        // Standard progress is reported by the part's gate, not here.
        drop(ctx);
        assert_eq!(aggregator.finish().await, 0);
    }

    #[tokio::test]
    async fn standard_chunk_exhausts_budget() {
        let dir = TempDir::new().unwrap();
        let server = MockServer {
            fail_rule: Some(Box::new(|_, _| Some(json(500, serde_json::json!({"error": "down"}))))),
            ..MockServer::default()
        };
        let (server, ctx, _aggregator, part) = context(server, false, &dir).await;

        let range = ByteRange::new(0, 16 * 1024);
        let err = upload_chunk(&ctx, part, range, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            UploadError::ChunkFailed {
                part, range: r, attempts, ..
            } => {
                assert_eq!(part, 1);
                assert_eq!(r, range);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.attempts_at(1, 0), 3);
        assert!(server.stored_ranges(1).is_empty());
    }

    #[tokio::test]
    async fn intelligent_chunk_follows_directive() {
        let dir = TempDir::new().unwrap();
        let server = MockServer {
            grant_intelligent: true,
            fail_rule: Some(Box::new(|req, _| {
                (req.size > 4096).then(|| {
                    json(
                        400,
                        serde_json::json!({"retry": {"offset": req.offset, "size": 4096}}),
                    )
                })
            })),
            ..MockServer::default()
        };
        let (server, ctx, aggregator, part) = context(server, true, &dir).await;

        let range = ByteRange::new(16 * 1024, 16 * 1024);
        let ack = upload_chunk(&ctx, part, range, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ack.range, range);

        // One failed full-size attempt, then four 4 KiB pieces.
        let stored = server.stored_ranges(1);
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|&(_, len)| len == 4096));
        assert_eq!(stored.iter().map(|&(_, len)| len).sum::<u64>(), 16 * 1024);
        assert_eq!(stored[0].0, 16 * 1024);

        assert_eq!(ctx.tracker.sent(1), 16 * 1024);
        drop(ctx);
        assert_eq!(aggregator.finish().await, 16 * 1024);
    }

    #[tokio::test]
    async fn intelligent_chunk_halves_without_directive() {
        let dir = TempDir::new().unwrap();
        let server = MockServer {
            grant_intelligent: true,
            fail_rule: Some(Box::new(|req, _| {
                (req.size > 8192).then(|| json(503, serde_json::json!({"error": "busy"})))
            })),
            ..MockServer::default()
        };
        let (server, ctx, _aggregator, part) = context(server, true, &dir).await;

        let range = ByteRange::new(0, 16 * 1024);
        upload_chunk(&ctx, part, range, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(server.stored_ranges(1), vec![(0, 8192), (8192, 8192)]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let (server, ctx, _aggregator, part) = context(MockServer::default(), false, &dir).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = upload_chunk(&ctx, part, ByteRange::new(0, 1024), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(server.state().uploads.is_empty());
    }
}
