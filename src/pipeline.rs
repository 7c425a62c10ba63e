// Planner -> extractors -> aggregators -> merger over bounded queues.
// A stage is finished when all of its senders are dropped (close-then-drain).

use crate::aggregate::StationMap;
use crate::aggregator::run_aggregator_worker;
use crate::error::PipelineError;
use crate::merger::{ResultMerger, Summary};
use crate::planner::{ByteRange, ChunkPlanner};
use crate::reader::{find_first_blank_line, map_input, ChunkExtractor, LineBatch, ReaderConfig, SourceMode};
use crate::stats::{PipelineStats, RunStats};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// What an empty line in the input means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BlankLinePolicy {
    /// Ignore empty lines wherever they appear
    #[default]
    Skip,
    /// The first empty line ends the input; nothing after it is aggregated
    Terminate,
}

/// Tuning for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Size of each candidate chunk in bytes (default: 1MB)
    pub chunk_size: u64,
    /// Concurrent chunk extractors, each with its own read cursor
    pub extractors: usize,
    /// Concurrent record aggregators, each with a private station map
    pub aggregators: usize,
    /// Capacity of the planner -> extractor queue
    pub task_queue_capacity: usize,
    /// Capacity of the extractor -> aggregator queue
    pub batch_queue_capacity: usize,
    /// Capacity of the aggregator -> merger queue
    pub partial_queue_capacity: usize,
    /// Hand partial maps to the merger every N batches instead of only at the end
    pub flush_every_batches: Option<usize>,
    pub blank_lines: BlankLinePolicy,
    pub reader: ReaderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            chunk_size: 1_000_000,
            extractors: (cpus / 2).max(1),
            aggregators: cpus,
            task_queue_capacity: 1024,
            batch_queue_capacity: 100,
            partial_queue_capacity: cpus * 2,
            flush_every_batches: None,
            blank_lines: BlankLinePolicy::Skip,
            reader: ReaderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make the pipeline stall or divide by zero
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::config("chunk size must be greater than zero"));
        }
        if self.extractors == 0 {
            return Err(PipelineError::config("at least one extractor is required"));
        }
        if self.aggregators == 0 {
            return Err(PipelineError::config("at least one aggregator is required"));
        }
        if self.task_queue_capacity == 0 || self.batch_queue_capacity == 0 || self.partial_queue_capacity == 0 {
            return Err(PipelineError::config("queue capacities must be greater than zero"));
        }
        if self.reader.scan_window == 0 {
            return Err(PipelineError::config("scan window must be greater than zero"));
        }
        Ok(())
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub summary: Summary,
    pub stats: RunStats,
}

/// Aggregate every `station;temperature` record of `path`
pub async fn aggregate_file(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    aggregate_file_with_stats(path, config, Arc::new(PipelineStats::new())).await
}

/// Like [`aggregate_file`], publishing live counters to `stats` for progress reporting
pub async fn aggregate_file_with_stats(
    path: impl AsRef<Path>,
    config: &PipelineConfig,
    stats: Arc<PipelineStats>,
) -> Result<PipelineOutput, PipelineError> {
    let path = path.as_ref();
    config.validate()?;

    let start_time = std::time::Instant::now();
    let file_size = input_size(path).await?;

    let effective_size = match config.blank_lines {
        BlankLinePolicy::Skip => file_size,
        BlankLinePolicy::Terminate => find_first_blank_line(path, file_size, config.reader.scan_window)
            .await?
            .unwrap_or(file_size),
    };
    stats.input_bytes.store(effective_size, Ordering::Relaxed);
    if effective_size < file_size {
        info!("Blank line at byte {} ends input; ignoring the remaining {} bytes", effective_size, file_size - effective_size);
    }

    let summary = if effective_size == 0 {
        debug!("Nothing to aggregate in {}", path.display());
        Summary::default()
    } else {
        run_stages(path, effective_size, config, &stats).await?
    };

    let elapsed = start_time.elapsed();
    let run_stats = RunStats {
        path: path.display().to_string(),
        file_size,
        effective_size,
        chunk_size: config.chunk_size,
        extractors: config.extractors,
        aggregators: config.aggregators,
        source_mode: config.reader.mode,
        blank_lines: config.blank_lines,
        stations: summary.len(),
        processing_time_ms: elapsed.as_millis() as u64,
        mb_per_sec: RunStats::throughput(effective_size, elapsed),
        counters: stats.snapshot(),
    };

    info!(
        "Aggregated {}: {} records, {} stations, {} malformed in {}ms ({:.2} MB/s)",
        path.display(),
        run_stats.counters.records_aggregated,
        run_stats.stations,
        run_stats.counters.malformed_records,
        run_stats.processing_time_ms,
        run_stats.mb_per_sec
    );

    Ok(PipelineOutput { summary, stats: run_stats })
}

/// Size of the input, mapping a missing or non-regular path to a configuration error
async fn input_size(path: &Path) -> Result<u64, PipelineError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::config(format!("input file does not exist: {}", path.display())));
        }
        Err(e) => return Err(PipelineError::io(path, "reading input metadata", e)),
    };

    if !metadata.is_file() {
        return Err(PipelineError::config(format!("input path is not a file: {}", path.display())));
    }
    Ok(metadata.len())
}

async fn run_stages(
    path: &Path,
    len: u64,
    config: &PipelineConfig,
    stats: &Arc<PipelineStats>,
) -> Result<Summary, PipelineError> {
    let planner = ChunkPlanner::new(len, config.chunk_size)?;
    let map = match config.reader.mode {
        SourceMode::Mmap => Some(map_input(path)?),
        SourceMode::Buffered => None,
    };

    info!(
        "Processing {} ({} bytes) as {} chunks of {} bytes with {} extractors and {} aggregators",
        path.display(),
        len,
        planner.chunk_count(),
        config.chunk_size,
        config.extractors,
        config.aggregators
    );

    // Bounded queues are the only backpressure: a full queue parks its producer
    let (task_tx, task_rx) = mpsc::channel::<ByteRange>(config.task_queue_capacity);
    let (batch_tx, batch_rx) = mpsc::channel::<LineBatch>(config.batch_queue_capacity);
    let (partial_tx, partial_rx) = mpsc::channel::<StationMap>(config.partial_queue_capacity);

    let merger = tokio::spawn(ResultMerger::new().run(partial_rx, stats.clone()));

    let shared_batches = Arc::new(std::sync::Mutex::new(batch_rx));
    let mut aggregators = Vec::with_capacity(config.aggregators);
    for id in 0..config.aggregators {
        let batches = shared_batches.clone();
        let partials = partial_tx.clone();
        let stats = stats.clone();
        let flush_every = config.flush_every_batches;
        aggregators.push(tokio::task::spawn_blocking(move || {
            run_aggregator_worker(id, batches, partials, flush_every, stats)
        }));
    }
    drop(partial_tx);
    drop(shared_batches);

    let abort = Arc::new(AtomicBool::new(false));
    let shared_tasks = Arc::new(Mutex::new(task_rx));
    let mut extractors = Vec::with_capacity(config.extractors);
    for id in 0..config.extractors {
        let worker = ExtractorWorker {
            id,
            path: path.to_path_buf(),
            len,
            map: map.clone(),
            reader: config.reader.clone(),
            tasks: shared_tasks.clone(),
            batches: batch_tx.clone(),
            abort: abort.clone(),
            stats: stats.clone(),
        };
        extractors.push(tokio::spawn(worker.run()));
    }
    drop(batch_tx);
    drop(shared_tasks);

    let planned = tokio::spawn(feed_tasks(planner, task_tx, stats.clone()));

    // Drain every stage in order, keeping only the first failure
    let mut first_error: Option<PipelineError> = None;
    let mut record_error = |error: PipelineError| {
        warn!("Pipeline stage failed: {}", error);
        first_error.get_or_insert(error);
    };

    match planned.await {
        Ok(count) => debug!("Planner queued {} chunks", count),
        Err(e) => record_error(e.into()),
    }
    for handle in extractors {
        match handle.await {
            Ok(Ok(count)) => debug!("Extractor produced {} batches", count),
            Ok(Err(e)) => record_error(e),
            Err(e) => record_error(e.into()),
        }
    }
    for handle in aggregators {
        match handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => record_error(e),
            Err(e) => record_error(e.into()),
        }
    }
    let summary = merger.await;

    if let Some(error) = first_error {
        return Err(error);
    }
    Ok(summary?)
}

/// Queue every planned range, stopping early if all extractors have gone away
async fn feed_tasks(planner: ChunkPlanner, tasks: mpsc::Sender<ByteRange>, stats: Arc<PipelineStats>) -> u64 {
    let mut sent = 0u64;
    for range in planner.ranges() {
        if tasks.send(range).await.is_err() {
            debug!("All extractors stopped; planner exiting after {} chunks", sent);
            break;
        }
        sent += 1;
        PipelineStats::add(&stats.chunks_planned, 1);
    }
    sent
}

struct ExtractorWorker {
    id: usize,
    path: PathBuf,
    len: u64,
    map: Option<Arc<Mmap>>,
    reader: ReaderConfig,
    tasks: Arc<Mutex<mpsc::Receiver<ByteRange>>>,
    batches: mpsc::Sender<LineBatch>,
    abort: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
}

impl ExtractorWorker {
    async fn run(self) -> Result<u64, PipelineError> {
        let abort = self.abort.clone();
        let id = self.id;
        let result = self.extract_all().await;
        if let Err(ref e) = result {
            warn!(extractor = id, "Extractor failed, stopping remaining extraction: {}", e);
            abort.store(true, Ordering::Relaxed);
        }
        result
    }

    async fn extract_all(self) -> Result<u64, PipelineError> {
        let mut extractor = match self.map {
            Some(map) => ChunkExtractor::from_mmap(&self.path, map, self.len, &self.reader)?,
            None => ChunkExtractor::open(&self.path, self.len, &self.reader).await?,
        };

        let mut produced = 0u64;
        loop {
            if self.abort.load(Ordering::Relaxed) {
                debug!(extractor = self.id, "Abort requested");
                break;
            }

            let next = self.tasks.lock().await.recv().await;
            let Some(range) = next else { break };

            match extractor.extract(range).await? {
                Some(batch) => {
                    PipelineStats::add(&self.stats.bytes_read, batch.byte_len() as u64);
                    PipelineStats::add(&self.stats.chunks_extracted, 1);
                    if self.batches.send(batch).await.is_err() {
                        return Err(PipelineError::WorkerPanicked(format!(
                            "aggregators stopped before extractor {} finished",
                            self.id
                        )));
                    }
                    produced += 1;
                }
                None => PipelineStats::add(&self.stats.chunks_empty, 1),
            }
        }

        debug!(extractor = self.id, "Extractor finished after {} batches", produced);
        Ok(produced)
    }
}
