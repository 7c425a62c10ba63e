use crate::error::PipelineError;

/// Candidate byte range `[begin, end)` of the input file
///
/// Not line-aligned: the extractor moves both edges to newline boundaries, and
/// `end` may run past the end of the file for the last chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub begin: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }
}

/// Splits a file of `file_size` bytes into fixed-size candidate chunks
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlanner {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, PipelineError> {
        if chunk_size == 0 {
            return Err(PipelineError::config("chunk size must be greater than zero"));
        }
        Ok(Self { file_size, chunk_size })
    }

    /// `ceil(file_size / chunk_size)`
    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    /// Lazily yields `{C*i, C*(i+1)}` for every chunk index
    pub fn ranges(&self) -> ChunkRanges {
        ChunkRanges {
            chunk_size: self.chunk_size,
            next: 0,
            count: self.chunk_count(),
        }
    }
}

/// Iterator returned by [`ChunkPlanner::ranges`]
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    chunk_size: u64,
    next: u64,
    count: u64,
}

impl Iterator for ChunkRanges {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.next >= self.count {
            return None;
        }
        let i = self.next;
        self.next += 1;
        let begin = i * self.chunk_size;
        Some(ByteRange::new(begin, begin.saturating_add(self.chunk_size)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkRanges {}
