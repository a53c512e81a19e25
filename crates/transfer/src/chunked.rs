use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use apkrelay_protocol::constants::PART_SUFFIX;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::TransferError;
use crate::types::Chunk;

/// Buffer used when streaming whole files.
const COPY_BUFFER_SIZE: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut checksum = Checksum::new();
    checksum.update(data);
    checksum.finalize()
}

/// Incremental SHA-256 for payloads that arrive as a stream.
#[derive(Default)]
pub struct Checksum {
    hasher: Sha256,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the hasher and returns the hex-encoded digest.
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub async fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut checksum = Checksum::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        checksum.update(&buf[..n]);
    }
    Ok(checksum.finalize())
}

// ---------------------------------------------------------------------------
// In-memory codec
// ---------------------------------------------------------------------------

fn validate_chunk_size(chunk_size: u64) -> Result<usize, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(
            "chunk size must be greater than zero".into(),
        ));
    }
    usize::try_from(chunk_size).map_err(|_| {
        TransferError::InvalidChunkSize(format!("{chunk_size} exceeds addressable memory"))
    })
}

fn checked_chunk_count(payload_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    u32::try_from(payload_size.div_ceil(chunk_size)).map_err(|_| {
        TransferError::InvalidChunkSize(format!(
            "chunk size {chunk_size} yields more than {} chunks",
            u32::MAX
        ))
    })
}

/// Splits `payload` into `ceil(len / chunk_size)` ordered chunks.
///
/// All chunks but the last are exactly `chunk_size` bytes. An empty
/// payload yields no chunks.
pub fn split(payload: &[u8], chunk_size: u64) -> Result<Vec<Chunk>, TransferError> {
    let size = validate_chunk_size(chunk_size)?;
    checked_chunk_count(payload.len() as u64, chunk_size)?;

    Ok(payload
        .chunks(size)
        .enumerate()
        .map(|(i, data)| Chunk {
            index: i as u32,
            offset: (i * size) as u64,
            data: data.to_vec(),
            checksum: String::new(),
        })
        .collect())
}

/// Reassembles chunks into the original payload.
///
/// Chunks may arrive in any order; they are sorted by index first. Fails
/// with [`TransferError::IncompleteTransfer`] when an index is missing or
/// duplicated, when byte ranges do not line up, or when a non-final chunk
/// deviates from the fixed chunk size.
pub fn reassemble(mut chunks: Vec<Chunk>) -> Result<Vec<u8>, TransferError> {
    chunks.sort_by_key(|c| c.index);

    let total: usize = chunks.iter().map(Chunk::len).sum();
    let regular = chunks.first().map(Chunk::len).unwrap_or(0);
    let last = chunks.len().saturating_sub(1);
    let mut out = Vec::with_capacity(total);

    for (position, chunk) in chunks.iter().enumerate() {
        let expected = position as u64;
        let index = u64::from(chunk.index);
        if index < expected {
            return Err(TransferError::IncompleteTransfer(format!(
                "duplicate chunk {index}"
            )));
        }
        if index > expected {
            return Err(TransferError::IncompleteTransfer(format!(
                "missing chunk {expected}"
            )));
        }
        if chunk.offset != out.len() as u64 {
            return Err(TransferError::IncompleteTransfer(format!(
                "chunk {index} starts at byte {}, expected {}",
                chunk.offset,
                out.len()
            )));
        }
        let irregular = if position < last {
            chunk.len() != regular
        } else {
            chunk.len() > regular
        };
        if irregular {
            return Err(TransferError::IncompleteTransfer(format!(
                "chunk {index} has {} bytes, chunk size is {regular}",
                chunk.len()
            )));
        }
        if !chunk.checksum.is_empty() && checksum_bytes(&chunk.data) != chunk.checksum {
            return Err(TransferError::ChecksumMismatch);
        }
        out.extend_from_slice(&chunk.data);
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks with automatic SHA-256 checksums.
///
/// Only one chunk is held in memory at a time.
pub struct ChunkReader {
    file: tokio::fs::File,
    chunk_size: usize,
    index: u32,
    offset: u64,
    file_size: u64,
    total_chunks: u32,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub async fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let size = validate_chunk_size(chunk_size)?;
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let total_chunks = checked_chunk_count(file_size, chunk_size)?;
        Ok(Self {
            file,
            chunk_size: size,
            index: 0,
            offset: 0,
            file_size,
            total_chunks,
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        self.file.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                TransferError::IncompleteTransfer("file shrank while reading".into())
            } else {
                e.into()
            }
        })?;

        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            checksum: checksum_bytes(&buf),
            data: buf,
        };
        self.index += 1;
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Number of chunks the whole file splits into.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }
}

// ---------------------------------------------------------------------------
// Part files
// ---------------------------------------------------------------------------

/// Finds `{name}.part{i}` files in `dir` and returns them in index order.
///
/// Fails when no part exists or the indices are not contiguous from 0.
/// With `expected` set, the number of parts must match exactly, so
/// leftovers of an earlier, longer payload and a missing trailing part
/// are both rejected.
pub async fn discover_parts(
    dir: &Path,
    name: &str,
    expected: Option<u32>,
) -> Result<Vec<PathBuf>, TransferError> {
    let prefix = format!("{name}{PART_SUFFIX}");
    let mut found: Vec<(u32, PathBuf)> = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(suffix) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        // Only canonical indices: `part01` is not part 1.
        if let Ok(index) = suffix.parse::<u32>()
            && index.to_string() == suffix
        {
            found.push((index, entry.path()));
        }
    }

    if found.is_empty() {
        return Err(TransferError::IncompleteTransfer(format!(
            "no parts of {name} in {}",
            dir.display()
        )));
    }

    found.sort_by_key(|(index, _)| *index);
    for (expected, (index, _)) in found.iter().enumerate() {
        if *index as usize != expected {
            return Err(TransferError::IncompleteTransfer(format!(
                "missing part {expected} of {name}"
            )));
        }
    }

    if let Some(expected) = expected
        && found.len() != expected as usize
    {
        return Err(TransferError::IncompleteTransfer(format!(
            "expected {expected} parts of {name}, found {}",
            found.len()
        )));
    }

    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Concatenates `parts` in the given order into `output`.
///
/// Verifies the whole-file checksum when `expected_checksum` is set.
/// The output file is removed again if anything fails.
pub async fn reassemble_files(
    parts: &[PathBuf],
    output: &Path,
    expected_checksum: Option<&str>,
) -> Result<u64, TransferError> {
    let result = concat_parts(parts, output, expected_checksum).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(output).await;
    }
    result
}

async fn concat_parts(
    parts: &[PathBuf],
    output: &Path,
    expected_checksum: Option<&str>,
) -> Result<u64, TransferError> {
    if parts.is_empty() {
        return Err(TransferError::IncompleteTransfer(
            "no parts to reassemble".into(),
        ));
    }

    let mut out = tokio::fs::File::create(output).await?;
    let mut checksum = Checksum::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;

    for part in parts {
        let mut file = match tokio::fs::File::open(part).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransferError::IncompleteTransfer(format!(
                    "missing part {}",
                    part.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            checksum.update(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        debug!(part = %part.display(), total, "part appended");
    }
    out.flush().await?;

    if let Some(expected) = expected_checksum
        && checksum.finalize() != expected
    {
        return Err(TransferError::ChecksumMismatch);
    }

    Ok(total)
}
