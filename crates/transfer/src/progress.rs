use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Aggregate bytes acknowledged across all parts of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 / self.total_bytes as f64
    }
}

/// Callback invoked with every new progress snapshot.
pub type ProgressCallback = Box<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Sending half handed to workers; cheap to clone.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<u64>,
}

impl ProgressReporter {
    /// Reports `bytes` newly acknowledged by the server.
    pub fn add(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        // The aggregator only goes away after every reporter is dropped.
        let _ = self.tx.send(bytes);
    }
}

/// Single writer of the job's progress counter.
///
/// Workers never touch the total themselves; they push increments through
/// a [`ProgressReporter`] and this task applies them one at a time, so
/// snapshots are monotonic and never exceed the total.
pub struct ProgressAggregator {
    task: JoinHandle<u64>,
}

impl ProgressAggregator {
    /// Spawns the aggregator task. Must be called inside a tokio runtime.
    pub fn spawn(total_bytes: u64, callback: Option<ProgressCallback>) -> (Self, ProgressReporter) {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();

        let task = tokio::spawn(async move {
            let mut sent: u64 = 0;
            while let Some(bytes) = rx.recv().await {
                let next = sent.saturating_add(bytes).min(total_bytes);
                if next == sent {
                    continue;
                }
                sent = next;
                if let Some(cb) = &callback {
                    cb(ProgressSnapshot {
                        bytes_sent: sent,
                        total_bytes,
                    });
                }
            }
            sent
        });

        (Self { task }, ProgressReporter { tx })
    }

    /// Waits until every reporter is dropped and returns the final total.
    pub async fn finish(self) -> u64 {
        match self.task.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "progress aggregator task failed");
                0
            }
        }
    }
}
