use crate::TransferError;
use crate::types::{ByteRange, Part};

/// Part layout of one source file.
///
/// Parts tile `[0, file_len)` without gaps or overlaps; the final part
/// absorbs the remainder, so no part is ever empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartLayout {
    file_len: u64,
    part_size: u64,
    parts: Vec<Part>,
}

impl PartLayout {
    /// Computes `ceil(file_len / part_size)` parts.
    pub fn compute(file_len: u64, part_size: u64) -> Result<Self, TransferError> {
        if file_len == 0 {
            return Err(TransferError::InvalidConfig(
                "cannot lay out an empty file".into(),
            ));
        }
        if part_size == 0 {
            return Err(TransferError::InvalidConfig(
                "part size must be at least 1 byte".into(),
            ));
        }

        let count = file_len.div_ceil(part_size);
        let count = u32::try_from(count).map_err(|_| {
            TransferError::InvalidConfig(format!(
                "{count} parts exceed the part numbering limit"
            ))
        })?;

        let parts = split_range(ByteRange::new(0, file_len), part_size)
            .into_iter()
            .zip(1..=count)
            .map(|(range, seq)| Part { seq, range })
            .collect();

        Ok(Self {
            file_len,
            part_size,
            parts,
        })
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Splits `range` into consecutive pieces of `size` bytes; the last may be shorter.
///
/// A zero `size` yields the whole range as a single piece.
pub fn split_range(range: ByteRange, size: u64) -> Vec<ByteRange> {
    if range.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![range];
    }

    let mut pieces = Vec::with_capacity(range.len.div_ceil(size) as usize);
    let mut offset = range.offset;
    while offset < range.end() {
        let len = size.min(range.end() - offset);
        pieces.push(ByteRange::new(offset, len));
        offset += len;
    }
    pieces
}
