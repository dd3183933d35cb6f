use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use md5::{Digest, Md5};

use crate::TransferError;
use crate::types::{ByteRange, Chunk};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes MD5 of `data` and returns the base64-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads arbitrary byte ranges of a source file.
///
/// Every read opens its own handle, so concurrent workers never share a
/// cursor. Reads are blocking; async callers go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    file_len: u64,
}

impl ChunkReader {
    /// Opens `path` for range reads and records its length.
    pub fn new(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file_len,
        })
    }

    /// Reads exactly `range` and checksums it.
    pub fn read_chunk(&self, part: u32, range: ByteRange) -> Result<Chunk, TransferError> {
        if range.end() > self.file_len {
            return Err(TransferError::OutOfBounds {
                range,
                file_len: self.file_len,
            });
        }

        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(range.offset))?;
        let mut data = vec![0u8; range.len as usize];
        file.read_exact(&mut data)?;

        let md5 = checksum_bytes(&data);
        Ok(Chunk {
            part,
            range,
            data,
            md5,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source length captured when the reader was opened.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }
}
