//! Byte-range primitives for chunked multipart uploads.
//!
//! Splits a source file into parts and chunks, reads chunk bytes with
//! independent positioned reads, and aggregates progress from concurrent
//! workers through a single writer.

mod chunked;
mod content_type;
mod layout;
mod progress;
mod types;
mod validation;

use std::path::PathBuf;

pub use chunked::{ChunkReader, checksum_bytes};
pub use content_type::detect_content_type;
pub use layout::{PartLayout, split_range};
pub use progress::{ProgressAggregator, ProgressCallback, ProgressReporter, ProgressSnapshot};
pub use types::{ByteRange, Chunk, Part, PartState, PartToken, PartTracker};
pub use validation::{validate_concurrency, validate_source};

/// Default part size: 8 MiB.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("source is not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("cannot read source file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("range {range} lies outside the {file_len}-byte source")]
    OutOfBounds { range: ByteRange, file_len: u64 },
}
