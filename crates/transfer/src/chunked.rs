use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::plan::ChunkRange;
use crate::types::Chunk;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let file = File::open(path).map_err(|e| unavailable_or_io(path, e))?;
    let (digest, _) = hash_reader(file)?;
    Ok(digest)
}

/// Streams `reader` through SHA-256, returning the digest and byte count.
fn hash_reader(mut reader: impl Read) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

fn unavailable_or_io(path: &Path, err: std::io::Error) -> TransferError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            TransferError::SourceUnavailable(format!("{}: {err}", path.display()))
        }
        _ => TransferError::Io(err),
    }
}

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Handle to the file being uploaded.
///
/// Only the path and the size seen at open time are kept; every read
/// reopens the file and checks it has not changed size, so a revoked or
/// rewritten source surfaces as [`TransferError::SourceUnavailable`]
/// instead of a digest of the wrong bytes.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    path: PathBuf,
    size: u64,
}

impl ChunkSource {
    /// Opens `path` and records its current size.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let meta = std::fs::metadata(path).map_err(|e| unavailable_or_io(path, e))?;
        if !meta.is_file() {
            return Err(TransferError::SourceUnavailable(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }

    /// Opens `path` for resume, requiring the size recorded at init time.
    pub fn open_expecting(path: &Path, expected_size: u64) -> Result<Self, TransferError> {
        let source = Self::open(path)?;
        if source.size != expected_size {
            return Err(TransferError::SourceUnavailable(format!(
                "{} is {} bytes, expected {expected_size}",
                path.display(),
                source.size
            )));
        }
        Ok(source)
    }

    /// Reads the bytes of `range`.
    pub fn read_range(&self, range: &ChunkRange) -> Result<Vec<u8>, TransferError> {
        let mut file = File::open(&self.path).map_err(|e| unavailable_or_io(&self.path, e))?;
        self.check_unchanged(&file)?;

        file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; range.len() as usize];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                TransferError::SourceUnavailable(format!(
                    "{} truncated while reading chunk {}",
                    self.path.display(),
                    range.index
                ))
            } else {
                TransferError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Reads `range` and hashes it.
    ///
    /// Called once per upload attempt so a retry never reuses a digest
    /// computed from an earlier read.
    pub fn read_chunk(&self, range: &ChunkRange) -> Result<Chunk, TransferError> {
        let data = self.read_range(range)?;
        let hash = checksum_bytes(&data);
        Ok(Chunk {
            index: range.index,
            offset: range.start,
            data,
            hash,
        })
    }

    /// Hashes the whole source.
    pub fn checksum(&self) -> Result<String, TransferError> {
        let file = File::open(&self.path).map_err(|e| unavailable_or_io(&self.path, e))?;
        self.check_unchanged(&file)?;
        let (digest, read) = hash_reader(file)?;
        if read != self.size {
            return Err(TransferError::SourceUnavailable(format!(
                "{} changed while hashing ({read} of {} bytes read)",
                self.path.display(),
                self.size
            )));
        }
        Ok(digest)
    }

    fn check_unchanged(&self, file: &File) -> Result<(), TransferError> {
        let len = file.metadata()?.len();
        if len != self.size {
            return Err(TransferError::SourceUnavailable(format!(
                "{} changed size ({} -> {len} bytes)",
                self.path.display(),
                self.size
            )));
        }
        Ok(())
    }

    /// Final path component, if it is valid UTF-8.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes recorded when the source was opened.
    pub fn size(&self) -> u64 {
        self.size
    }
}
