use crate::error::PipelineError;
use crate::planner::ByteRange;
use memchr::{memchr, memchr_iter};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, info};

/// How extractors get at the bytes of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Every extractor opens its own file handle and seeks independently
    #[default]
    Buffered,
    /// One read-only memory map shared by all extractors
    Mmap,
}

/// Configuration for chunk extraction
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Bytes read per step while searching for a newline boundary (default: 8KB)
    pub scan_window: usize,
    pub mode: SourceMode,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            scan_window: 8192,
            mode: SourceMode::Buffered,
        }
    }
}

/// Complete lines extracted from one line-aligned byte range
///
/// The batch owns its bytes; lines are handed out as borrowed slices so the
/// aggregator never allocates per line.
#[derive(Debug, Clone, Default)]
pub struct LineBatch {
    offset: u64,
    data: Vec<u8>,
}

impl LineBatch {
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Self { offset, data }
    }

    /// File offset of the first byte in this batch
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lines in file order, without their `\n` terminators
    ///
    /// The empty element produced by a trailing newline is dropped; interior blank
    /// lines are kept so the caller can apply its own blank-line policy.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let body = self.data.strip_suffix(&[b'\n']).unwrap_or(&self.data[..]);
        let has_lines = !self.data.is_empty();
        has_lines
            .then(|| body.split(|byte| *byte == b'\n'))
            .into_iter()
            .flatten()
    }
}

enum ChunkSource {
    File { file: File, scratch: Vec<u8> },
    Mapped(Arc<Mmap>),
}

/// Turns candidate byte ranges into line-aligned batches
///
/// Each extractor owns its read cursor, so any number of them can work on the same
/// file concurrently.
pub struct ChunkExtractor {
    path: PathBuf,
    len: u64,
    scan_window: usize,
    source: ChunkSource,
}

impl ChunkExtractor {
    /// Open a private file handle; only bytes below `len` are ever considered
    pub async fn open(path: &Path, len: u64, config: &ReaderConfig) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .await
            .map_err(|e| PipelineError::io(path, "opening input for extraction", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            len,
            scan_window: config.scan_window.max(1),
            source: ChunkSource::File {
                file,
                scratch: Vec::with_capacity(config.scan_window),
            },
        })
    }

    /// Share an existing read-only mapping
    ///
    /// Fails if the mapping is shorter than `len`, the same way a buffered read past
    /// the end of the file does.
    pub fn from_mmap(path: &Path, map: Arc<Mmap>, len: u64, config: &ReaderConfig) -> Result<Self, PipelineError> {
        let mapped = map.len() as u64;
        if mapped < len {
            return Err(PipelineError::io(
                path,
                format!("reading bytes 0..{len} from memory map"),
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("input shrank to {mapped} bytes"),
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            len,
            scan_window: config.scan_window.max(1),
            source: ChunkSource::Mapped(map),
        })
    }

    /// Number of bytes of input this extractor may read
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the first `\n` at or after `from`, or `None` if input ends first
    pub async fn find_newline(&mut self, from: u64) -> Result<Option<u64>, PipelineError> {
        if from >= self.len {
            return Ok(None);
        }

        match &mut self.source {
            ChunkSource::Mapped(map) => {
                let haystack = &map[from as usize..self.len as usize];
                Ok(memchr(b'\n', haystack).map(|i| from + i as u64))
            }
            ChunkSource::File { file, scratch } => {
                file.seek(SeekFrom::Start(from))
                    .await
                    .map_err(|e| PipelineError::io(&self.path, format!("seeking to {from}"), e))?;

                // Windowed reads, never one read() per byte
                let mut pos = from;
                while pos < self.len {
                    let want = (self.len - pos).min(self.scan_window as u64) as usize;
                    scratch.resize(want, 0);
                    file.read_exact(&mut scratch[..want]).await.map_err(|e| {
                        PipelineError::io(
                            &self.path,
                            format!("scanning for newline at {pos}..{}", pos + want as u64),
                            e,
                        )
                    })?;

                    if let Some(i) = memchr(b'\n', &scratch[..want]) {
                        return Ok(Some(pos + i as u64));
                    }
                    pos += want as u64;
                }
                Ok(None)
            }
        }
    }

    /// Bytes `[begin, end)`; both offsets must lie within the readable length
    pub async fn read_range(&mut self, begin: u64, end: u64) -> Result<Vec<u8>, PipelineError> {
        debug_assert!(begin <= end && end <= self.len);

        match &mut self.source {
            ChunkSource::Mapped(map) => Ok(map[begin as usize..end as usize].to_vec()),
            ChunkSource::File { file, .. } => {
                file.seek(SeekFrom::Start(begin))
                    .await
                    .map_err(|e| PipelineError::io(&self.path, format!("seeking to {begin}"), e))?;

                let mut data = vec![0u8; (end - begin) as usize];
                file.read_exact(&mut data).await.map_err(|e| {
                    PipelineError::io(&self.path, format!("reading bytes {begin}..{end}"), e)
                })?;
                Ok(data)
            }
        }
    }

    /// Move both edges of a candidate range to line boundaries
    ///
    /// Both edges use the same rule, "just past the first newline at or after the
    /// offset", so neighbouring chunks partition the input exactly: the chunk whose
    /// end falls inside a record owns that record, and the next chunk skips it.
    /// Returns `None` when nothing is left after correction.
    pub async fn align(&mut self, range: ByteRange) -> Result<Option<ByteRange>, PipelineError> {
        if range.begin >= self.len {
            return Ok(None);
        }

        let begin = if range.begin == 0 {
            0
        } else {
            match self.find_newline(range.begin).await? {
                Some(newline) => newline + 1,
                None => return Ok(None),
            }
        };

        let end = if range.end >= self.len {
            self.len
        } else {
            match self.find_newline(range.end).await? {
                Some(newline) => newline + 1,
                None => self.len,
            }
        };

        if end <= begin {
            return Ok(None);
        }
        Ok(Some(ByteRange::new(begin, end)))
    }

    /// Align `range` and read it as a batch of complete lines
    pub async fn extract(&mut self, range: ByteRange) -> Result<Option<LineBatch>, PipelineError> {
        let Some(aligned) = self.align(range).await? else {
            debug!("Chunk {}..{} is empty after alignment", range.begin, range.end);
            return Ok(None);
        };

        let data = self.read_range(aligned.begin, aligned.end).await?;
        debug!(
            "Extracted chunk {}..{} as {}..{} ({} bytes)",
            range.begin,
            range.end,
            aligned.begin,
            aligned.end,
            data.len()
        );
        Ok(Some(LineBatch::new(aligned.begin, data)))
    }
}

/// Offset of the first blank line in the first `len` bytes of `path`, if any
///
/// A blank line is an empty line, or one holding only `\r`: a `\n` or `\r\n` at
/// offset 0 or directly after another `\n`. The returned offset is where that line
/// starts, so truncating the input there drops the blank line and everything after it.
pub async fn find_first_blank_line(
    path: &Path,
    len: u64,
    window: usize,
) -> Result<Option<u64>, PipelineError> {
    let start_time = std::time::Instant::now();
    let mut file = File::open(path)
        .await
        .map_err(|e| PipelineError::io(path, "opening input for blank-line scan", e))?;

    let mut buf = vec![0u8; window.max(1)];
    let mut pos = 0u64;
    // Last two bytes before the current window; start of file counts as following a newline
    let mut tail = [b'\n', b'\n'];

    while pos < len {
        let want = (len - pos).min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..want])
            .await
            .map_err(|e| PipelineError::io(path, format!("scanning for blank line at {pos}"), e))?;

        let window_bytes = &buf[..want];
        let byte_before = |i: usize, back: usize| -> u8 {
            if i >= back {
                window_bytes[i - back]
            } else {
                tail[2 - (back - i)]
            }
        };

        for i in memchr_iter(b'\n', window_bytes) {
            let line_start = match (byte_before(i, 2), byte_before(i, 1)) {
                (_, b'\n') => Some(pos + i as u64),
                (b'\n', b'\r') => Some(pos + i as u64 - 1),
                _ => None,
            };
            if let Some(offset) = line_start {
                info!(
                    "First blank line at byte {} of {} (scan took {}ms)",
                    offset,
                    len,
                    start_time.elapsed().as_millis()
                );
                return Ok(Some(offset));
            }
        }

        tail = if want >= 2 {
            [window_bytes[want - 2], window_bytes[want - 1]]
        } else {
            [tail[1], window_bytes[0]]
        };
        pos += want as u64;
    }

    // Unterminated "\r" as the final line
    if len > 0 && tail == [b'\n', b'\r'] {
        return Ok(Some(len - 1));
    }

    debug!("No blank line in {} bytes of {}", len, path.display());
    Ok(None)
}

/// Map the whole input read-only for sharing across extractors
pub fn map_input(path: &Path) -> Result<Arc<Mmap>, PipelineError> {
    let file = std::fs::File::open(path)
        .map_err(|e| PipelineError::io(path, "opening input for mmap", e))?;
    // SAFETY: the map is read-only and the input is not modified while a run is in progress
    let map = unsafe { Mmap::map(&file) }
        .map_err(|e| PipelineError::io(path, "memory-mapping input", e))?;
    Ok(Arc::new(map))
}
