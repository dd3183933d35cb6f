//! Upload error types.

use fsmpu_transfer::ByteRange;

use crate::transport::TransportError;

/// Errors produced while running a multipart upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] fsmpu_transfer::TransferError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("server returned HTTP {status}")]
    Server {
        status: u16,
        body: Option<serde_json::Value>,
    },

    #[error("chunk {range} of part {part} failed after {attempts} attempt(s): {source}")]
    ChunkFailed {
        part: u32,
        range: ByteRange,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("part {part} failed: {source}")]
    PartFailed {
        part: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("finalize rejected with HTTP {status}")]
    Finalize {
        status: u16,
        body: Option<serde_json::Value>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("task failed: {0}")]
    Task(String),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Returns `true` for the cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Server payload attached to the failure, looking through wrappers.
    pub fn response_body(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Server { body, .. } | Self::Finalize { body, .. } => body.as_ref(),
            Self::ChunkFailed { source, .. } | Self::PartFailed { source, .. } => {
                source.response_body()
            }
            _ => None,
        }
    }

    /// Byte range of the chunk that caused the failure, if any.
    pub fn failed_range(&self) -> Option<(u32, ByteRange)> {
        match self {
            Self::ChunkFailed { part, range, .. } => Some((*part, *range)),
            Self::PartFailed { source, .. } => source.failed_range(),
            _ => None,
        }
    }
}
