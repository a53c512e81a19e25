use std::ops::Range;

/// An ordered slice of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based sequence index.
    pub index: u32,
    /// Byte offset of the first byte within the payload.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

impl Chunk {
    /// Number of bytes in this chunk.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte range this chunk covers within the payload.
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.data.len() as u64
    }
}
