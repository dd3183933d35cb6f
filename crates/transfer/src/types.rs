use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Half-open byte range `[offset, offset + len)` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// Exclusive end offset.
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &ByteRange) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// A contiguous slice of the source file, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub seq: u32,
    pub range: ByteRange,
}

/// Bytes of one chunk read from the source, ready for transmission.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Sequence number of the owning part.
    pub part: u32,
    /// Absolute range within the source file.
    pub range: ByteRange,
    pub data: Vec<u8>,
    /// Base64 MD5 of `data`.
    pub md5: String,
}

/// Server acknowledgment proving a part's bytes were received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartToken {
    /// Standard sessions: the ETag presented at finalize.
    ETag(String),
    /// Intelligent Ingestion sessions: the part was committed server-side.
    Committed,
}

/// Lifecycle of a part inside one upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// Tracks the state and acknowledged bytes of every part of a job (thread-safe).
///
/// Each part's entry is only mutated by its own worker; the coordinator
/// reads the table to decide whether the job may be finalized.
pub struct PartTracker {
    inner: RwLock<Vec<PartEntry>>,
}

#[derive(Debug, Clone, Copy)]
struct PartEntry {
    len: u64,
    state: PartState,
    sent: u64,
}

impl PartTracker {
    /// Creates a tracker with every part pending.
    pub fn new(parts: &[Part]) -> Self {
        Self {
            inner: RwLock::new(
                parts
                    .iter()
                    .map(|p| PartEntry {
                        len: p.range.len,
                        state: PartState::Pending,
                        sent: 0,
                    })
                    .collect(),
            ),
        }
    }

    fn update(&self, seq: u32, f: impl FnOnce(&mut PartEntry)) {
        let mut entries = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = seq
            .checked_sub(1)
            .and_then(|idx| entries.get_mut(idx as usize))
        {
            f(entry);
        }
    }

    /// Marks a part as handed to a worker.
    pub fn start(&self, seq: u32) {
        self.update(seq, |e| e.state = PartState::InFlight);
    }

    /// Records acknowledged bytes for a part, never beyond its length.
    pub fn add_sent(&self, seq: u32, bytes: u64) {
        self.update(seq, |e| e.sent = (e.sent + bytes).min(e.len));
    }

    pub fn complete(&self, seq: u32) {
        self.update(seq, |e| e.state = PartState::Completed);
    }

    pub fn fail(&self, seq: u32) {
        self.update(seq, |e| e.state = PartState::Failed);
    }

    /// Current state of a part (`None` for an unknown sequence number).
    pub fn state(&self, seq: u32) -> Option<PartState> {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let idx = seq.checked_sub(1)? as usize;
        entries.get(idx).map(|e| e.state)
    }

    /// Bytes acknowledged so far for a part.
    pub fn sent(&self, seq: u32) -> u64 {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        seq.checked_sub(1)
            .and_then(|idx| entries.get(idx as usize))
            .map_or(0, |e| e.sent)
    }

    /// Returns `true` once every part is completed.
    pub fn all_completed(&self) -> bool {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().all(|e| e.state == PartState::Completed)
    }

    /// Sum of the lengths of completed parts.
    pub fn completed_bytes(&self) -> u64 {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|e| e.state == PartState::Completed)
            .map(|e| e.len)
            .sum()
    }

    /// Number of parts in a given state.
    pub fn count(&self, state: PartState) -> usize {
        let entries = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().filter(|e| e.state == state).count()
    }
}
