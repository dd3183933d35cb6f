use std::path::Path;

use crate::TransferError;

/// Checks that `path` is a readable, non-empty regular file and returns its length.
///
/// Rejects:
/// - Missing or unreadable paths
/// - Directories and other non-regular files
/// - Zero-length files (an empty upload is an error, not a trivial success)
pub fn validate_source(path: &Path) -> Result<u64, TransferError> {
    let metadata = std::fs::metadata(path).map_err(|source| TransferError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    if !metadata.is_file() {
        return Err(TransferError::NotAFile(path.to_path_buf()));
    }

    // Metadata alone does not prove read permission.
    std::fs::File::open(path).map_err(|source| TransferError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    if metadata.len() == 0 {
        return Err(TransferError::EmptyFile(path.to_path_buf()));
    }

    Ok(metadata.len())
}

/// Checks that a concurrency bound is at least 1.
pub fn validate_concurrency(name: &str, value: usize) -> Result<usize, TransferError> {
    if value == 0 {
        return Err(TransferError::InvalidConfig(format!(
            "{name} must be at least 1"
        )));
    }
    Ok(value)
}
