use anyhow::{Context, Result};
use chunkagg::{aggregate_file_with_stats, BlankLinePolicy, PipelineConfig, PipelineStats, ReaderConfig, SourceMode};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chunkagg")]
#[command(about = "Parallel min/mean/max aggregation of station;temperature measurement files")]
#[command(version)]
struct Args {
    /// Measurement file with one `station;temperature` record per line
    input: PathBuf,

    /// Candidate chunk size in bytes
    #[arg(long, default_value_t = 1_000_000)]
    chunk_size: u64,

    /// Concurrent chunk extractors (default: half the CPU cores)
    #[arg(long)]
    extractors: Option<usize>,

    /// Concurrent record aggregators (default: all CPU cores)
    #[arg(long)]
    aggregators: Option<usize>,

    /// Capacity of the chunk task queue
    #[arg(long, default_value_t = 1024)]
    task_queue: usize,

    /// Capacity of the line batch queue
    #[arg(long, default_value_t = 100)]
    batch_queue: usize,

    /// Hand partial results to the merger every N batches
    #[arg(long)]
    flush_every: Option<usize>,

    /// Whether an empty line is skipped or ends the input
    #[arg(long, value_enum, default_value_t = BlankLinePolicy::Skip)]
    blank_lines: BlankLinePolicy,

    /// Use memory-mapped I/O instead of per-extractor file handles
    #[arg(long)]
    use_mmap: bool,

    /// Suppress the console progress bar
    #[arg(long)]
    no_progress: bool,

    /// Write run statistics as JSON to this path
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        let aggregators = self.aggregators.unwrap_or(defaults.aggregators);
        PipelineConfig {
            chunk_size: self.chunk_size,
            extractors: self.extractors.unwrap_or(defaults.extractors),
            aggregators,
            task_queue_capacity: self.task_queue,
            batch_queue_capacity: self.batch_queue,
            partial_queue_capacity: (aggregators * 2).max(1),
            flush_every_batches: self.flush_every,
            blank_lines: self.blank_lines,
            reader: ReaderConfig {
                mode: if self.use_mmap { SourceMode::Mmap } else { SourceMode::Buffered },
                ..ReaderConfig::default()
            },
        }
    }
}

/// Poll the shared counters into a byte-based progress bar until aborted
///
/// `total_bytes` is the raw file size; the pipeline's `input_bytes` replaces it once known.
fn spawn_progress(total_bytes: u64, stats: Arc<PipelineStats>) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let ticker = bar.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            // Shrinks to the truncated length once a blank line ends the input
            let input_bytes = PipelineStats::get(&stats.input_bytes);
            if input_bytes > 0 && Some(input_bytes) != ticker.length() {
                ticker.set_length(input_bytes);
            }
            ticker.set_position(PipelineStats::get(&stats.bytes_read));
            ticker.set_message(format!("{} records", PipelineStats::get(&stats.records_aggregated)));
        }
    });
    (bar, handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    // WHY: JSON logs go to stderr so stdout carries only the result line
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    info!(?args, "Parsed CLI arguments");

    let config = args.pipeline_config();
    let stats = Arc::new(PipelineStats::new());

    let progress = if args.no_progress {
        None
    } else {
        tokio::fs::metadata(&args.input)
            .await
            .ok()
            .map(|metadata| spawn_progress(metadata.len(), stats.clone()))
    };

    let result = aggregate_file_with_stats(&args.input, &config, stats).await;

    if let Some((bar, handle)) = progress {
        handle.abort();
        bar.finish_and_clear();
    }

    let output = result.with_context(|| format!("Failed to aggregate {}", args.input.display()))?;

    println!("{}", output.summary);

    if let Some(stats_path) = &args.stats_out {
        output
            .stats
            .write_json(stats_path)
            .await
            .with_context(|| format!("Failed to write stats to {}", stats_path.display()))?;
        info!("Run statistics written to {}", stats_path.display());
    }

    Ok(())
}
