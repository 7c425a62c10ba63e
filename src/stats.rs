// Run counters for progress and diagnostics. Workers only bump them; the pipeline
// never reads them back.

use crate::pipeline::BlankLinePolicy;
use crate::reader::SourceMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

/// Live counters shared by every stage of a run
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Bytes the run will consider, known once any blank-line truncation is applied
    pub input_bytes: AtomicU64,
    pub chunks_planned: AtomicU64,
    pub chunks_extracted: AtomicU64,
    pub chunks_empty: AtomicU64,
    pub bytes_read: AtomicU64,
    pub batches_aggregated: AtomicU64,
    pub lines_seen: AtomicU64,
    pub records_aggregated: AtomicU64,
    pub malformed_records: AtomicU64,
    pub blank_lines: AtomicU64,
    pub partials_merged: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            input_bytes: Self::get(&self.input_bytes),
            chunks_planned: Self::get(&self.chunks_planned),
            chunks_extracted: Self::get(&self.chunks_extracted),
            chunks_empty: Self::get(&self.chunks_empty),
            bytes_read: Self::get(&self.bytes_read),
            batches_aggregated: Self::get(&self.batches_aggregated),
            lines_seen: Self::get(&self.lines_seen),
            records_aggregated: Self::get(&self.records_aggregated),
            malformed_records: Self::get(&self.malformed_records),
            blank_lines: Self::get(&self.blank_lines),
            partials_merged: Self::get(&self.partials_merged),
        }
    }
}

/// Plain copy of [`PipelineStats`]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub input_bytes: u64,
    pub chunks_planned: u64,
    pub chunks_extracted: u64,
    pub chunks_empty: u64,
    pub bytes_read: u64,
    pub batches_aggregated: u64,
    pub lines_seen: u64,
    pub records_aggregated: u64,
    pub malformed_records: u64,
    pub blank_lines: u64,
    pub partials_merged: u64,
}

/// Statistics for a whole run, written with `--stats-out`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunStats {
    /// Input file path
    pub path: String,
    /// Size of the input file in bytes
    pub file_size: u64,
    /// Bytes actually considered (smaller than `file_size` when a blank line ends input)
    pub effective_size: u64,
    pub chunk_size: u64,
    pub extractors: usize,
    pub aggregators: usize,
    pub source_mode: SourceMode,
    pub blank_lines: BlankLinePolicy,
    /// Number of distinct stations in the result
    pub stations: usize,
    /// Wall-clock time of the pipeline in milliseconds
    pub processing_time_ms: u64,
    /// Throughput in megabytes per second
    pub mb_per_sec: f64,
    pub counters: StatsSnapshot,
}

impl RunStats {
    pub fn throughput(bytes: u64, elapsed: std::time::Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            (bytes as f64 / 1_000_000.0) / secs
        } else {
            0.0
        }
    }

    /// Write pretty-printed JSON to `path`
    pub async fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(content.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}
