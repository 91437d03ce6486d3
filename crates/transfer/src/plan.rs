use crate::TransferError;

/// Byte range `[start, end)` of one planned chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Fixed-size split of a file into chunks.
///
/// A zero-byte file plans zero chunks: `total_chunks` is always
/// `ceil(file_size / chunk_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    /// Plans `file_size` bytes in chunks of `chunk_size`.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidPlan(
                "chunk size must be positive".into(),
            ));
        }
        let total = file_size.div_ceil(chunk_size);
        let total_chunks = u32::try_from(total).map_err(|_| {
            TransferError::InvalidPlan(format!(
                "{file_size} bytes in {chunk_size}-byte chunks exceeds the chunk index space"
            ))
        })?;
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    /// Rebuilds a persisted plan, checking that its chunk count is consistent.
    pub fn from_parts(
        file_size: u64,
        chunk_size: u64,
        total_chunks: u32,
    ) -> Result<Self, TransferError> {
        let plan = Self::new(file_size, chunk_size)?;
        if plan.total_chunks != total_chunks {
            return Err(TransferError::InvalidPlan(format!(
                "expected {} chunks for {file_size} bytes, record says {total_chunks}",
                plan.total_chunks
            )));
        }
        Ok(plan)
    }

    /// Returns the byte range of chunk `index`, or `None` past the end.
    pub fn range(&self, index: u32) -> Option<ChunkRange> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.file_size);
        Some(ChunkRange { index, start, end })
    }

    /// Iterates over every planned range in index order.
    pub fn ranges(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        self.indices().filter_map(|i| self.range(i))
    }

    /// All chunk indices in order.
    pub fn indices(&self) -> std::ops::Range<u32> {
        0..self.total_chunks
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }
}
