use crate::aggregate::{observe_into, StationMap};
use crate::error::{MalformedRecord, PipelineError};
use crate::reader::LineBatch;
use crate::stats::PipelineStats;
use memchr::memchr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receiver shared by a pool of blocking workers
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

// Only the first few malformed lines per worker are logged individually
const MALFORMED_LOG_LIMIT: u64 = 10;

/// Split a raw line into station name and temperature
///
/// The name is everything before the first `;` and must be non-empty UTF-8; the
/// value must parse as a finite `f64`. A trailing `\r` is ignored.
pub fn parse_record(line: &[u8]) -> Result<(&str, f64), MalformedRecord> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let split = memchr(b';', line).ok_or(MalformedRecord::MissingDelimiter)?;
    let (key, value) = (&line[..split], &line[split + 1..]);

    if key.is_empty() {
        return Err(MalformedRecord::EmptyKey);
    }
    let key = std::str::from_utf8(key).map_err(|_| MalformedRecord::InvalidKey)?;
    let value = std::str::from_utf8(value)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(MalformedRecord::InvalidValue)?;

    Ok((key, value))
}

/// Per-worker tallies, published to [`PipelineStats`] as batches complete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorCounters {
    pub batches: u64,
    pub lines: u64,
    pub records: u64,
    pub malformed: u64,
    pub blank_lines: u64,
}

impl AggregatorCounters {
    fn publish(&self, stats: &PipelineStats) {
        PipelineStats::add(&stats.batches_aggregated, self.batches);
        PipelineStats::add(&stats.lines_seen, self.lines);
        PipelineStats::add(&stats.records_aggregated, self.records);
        PipelineStats::add(&stats.malformed_records, self.malformed);
        PipelineStats::add(&stats.blank_lines, self.blank_lines);
    }

    fn accumulate(&mut self, other: &AggregatorCounters) {
        self.batches += other.batches;
        self.lines += other.lines;
        self.records += other.records;
        self.malformed += other.malformed;
        self.blank_lines += other.blank_lines;
    }
}

/// Parses lines and folds them into a private station map
///
/// The map is never shared: it leaves the aggregator only by being moved out
/// with [`RecordAggregator::take_partial`].
#[derive(Debug, Default)]
pub struct RecordAggregator {
    id: usize,
    stations: StationMap,
    counters: AggregatorCounters,
}

impl RecordAggregator {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Fold one line; malformed lines are counted and skipped
    pub fn fold_line(&mut self, line: &[u8]) {
        self.counters.lines += 1;

        if line.is_empty() || line == b"\r" {
            self.counters.blank_lines += 1;
            return;
        }

        match parse_record(line) {
            Ok((station, value)) => {
                observe_into(&mut self.stations, station, value);
                self.counters.records += 1;
            }
            Err(reason) => {
                self.counters.malformed += 1;
                if self.counters.malformed <= MALFORMED_LOG_LIMIT {
                    debug!(
                        worker = self.id,
                        "Skipping malformed record {:?}: {}",
                        String::from_utf8_lossy(line),
                        reason
                    );
                }
            }
        }
    }

    /// Fold every line of a batch, returning the tallies for this batch alone
    pub fn fold_batch(&mut self, batch: &LineBatch) -> AggregatorCounters {
        let before = self.counters;
        for line in batch.lines() {
            self.fold_line(line);
        }
        self.counters.batches += 1;

        AggregatorCounters {
            batches: 1,
            lines: self.counters.lines - before.lines,
            records: self.counters.records - before.records,
            malformed: self.counters.malformed - before.malformed,
            blank_lines: self.counters.blank_lines - before.blank_lines,
        }
    }

    /// Move the accumulated map out, leaving an empty one behind
    pub fn take_partial(&mut self) -> StationMap {
        std::mem::take(&mut self.stations)
    }

    pub fn stations(&self) -> &StationMap {
        &self.stations
    }

    pub fn counters(&self) -> AggregatorCounters {
        self.counters
    }
}

/// Blocking worker loop: drain line batches until the queue closes, then hand the
/// private map to the merger
///
/// With `flush_every = Some(n)` the map is also handed over after every `n` batches.
/// Must run on a blocking thread (`spawn_blocking`).
pub fn run_aggregator_worker(
    id: usize,
    batches: SharedReceiver<LineBatch>,
    partials: mpsc::Sender<StationMap>,
    flush_every: Option<usize>,
    stats: Arc<PipelineStats>,
) -> Result<AggregatorCounters, PipelineError> {
    let start_time = std::time::Instant::now();
    let mut aggregator = RecordAggregator::new(id);
    let mut published = AggregatorCounters::default();
    let flush_every = flush_every.filter(|n| *n > 0).map(|n| n as u64);

    debug!(worker = id, "Aggregator started");

    loop {
        // Guard is released before parsing
        let next = {
            let mut receiver = batches
                .lock()
                .map_err(|_| PipelineError::WorkerPanicked("batch queue lock poisoned".to_string()))?;
            receiver.blocking_recv()
        };
        let Some(batch) = next else { break };

        let delta = aggregator.fold_batch(&batch);
        drop(batch);
        delta.publish(&stats);
        published.accumulate(&delta);

        if let Some(n) = flush_every {
            if aggregator.counters().batches % n == 0 && !aggregator.stations().is_empty() {
                send_partial(id, &partials, aggregator.take_partial())?;
            }
        }
    }

    let counters = aggregator.counters();
    debug_assert_eq!(counters, published);

    if !aggregator.stations().is_empty() {
        send_partial(id, &partials, aggregator.take_partial())?;
    }

    if counters.malformed > 0 {
        warn!(worker = id, "Skipped {} malformed records", counters.malformed);
    }
    info!(
        worker = id,
        "Aggregator finished: {} batches, {} records in {}ms",
        counters.batches,
        counters.records,
        start_time.elapsed().as_millis()
    );
    Ok(counters)
}

fn send_partial(
    id: usize,
    partials: &mpsc::Sender<StationMap>,
    partial: StationMap,
) -> Result<(), PipelineError> {
    debug!(worker = id, "Handing {} stations to merger", partial.len());
    partials
        .blocking_send(partial)
        .map_err(|_| PipelineError::WorkerPanicked(format!("merger stopped before aggregator {id} finished")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;

    #[test]
    fn test_parse_valid_records() {
        assert_eq!(parse_record(b"Hamburg;12.0"), Ok(("Hamburg", 12.0)));
        assert_eq!(parse_record(b"St. John's;-3.4"), Ok(("St. John's", -3.4)));
        assert_eq!(parse_record(b"Abha;0.0\r"), Ok(("Abha", 0.0)));
        assert_eq!(parse_record("Zürich;9.9".as_bytes()), Ok(("Zürich", 9.9)));
    }

    #[test]
    fn test_parse_malformed_records() {
        assert_eq!(parse_record(b"BADLINE"), Err(MalformedRecord::MissingDelimiter));
        assert_eq!(parse_record(b";12.0"), Err(MalformedRecord::EmptyKey));
        assert_eq!(parse_record(b"A;"), Err(MalformedRecord::InvalidValue));
        assert_eq!(parse_record(b"A;warm"), Err(MalformedRecord::InvalidValue));
        assert_eq!(parse_record(b"A;1.0;2.0"), Err(MalformedRecord::InvalidValue));
        assert_eq!(parse_record(b"A;NaN"), Err(MalformedRecord::InvalidValue));
        assert_eq!(parse_record(b"A;inf"), Err(MalformedRecord::InvalidValue));
        assert_eq!(parse_record(&[0xFF, b';', b'1']), Err(MalformedRecord::InvalidKey));
    }

    #[test]
    fn test_fold_batch_skips_malformed_without_affecting_others() {
        let mut aggregator = RecordAggregator::new(0);
        let batch = LineBatch::new(0, b"A;1.0\nBADLINE\nA;3.0\n".to_vec());

        let delta = aggregator.fold_batch(&batch);

        assert_eq!(delta.lines, 3);
        assert_eq!(delta.records, 2);
        assert_eq!(delta.malformed, 1);
        let a = aggregator.stations()["A"];
        assert_eq!(a, Aggregate { sum: 4.0, count: 2, min: 1.0, max: 3.0 });
        assert_eq!(a.mean(), 2.0);
    }

    #[test]
    fn test_blank_lines_are_counted_not_malformed() {
        let mut aggregator = RecordAggregator::new(0);
        aggregator.fold_batch(&LineBatch::new(0, b"A;1.0\n\n\r\nB;2.0\n".to_vec()));

        let counters = aggregator.counters();
        assert_eq!(counters.blank_lines, 2);
        assert_eq!(counters.malformed, 0);
        assert_eq!(counters.records, 2);
    }

    #[test]
    fn test_take_partial_drains_map() {
        let mut aggregator = RecordAggregator::new(0);
        aggregator.fold_batch(&LineBatch::new(0, b"X;10.0\nY;20.5\nX;30.0\n".to_vec()));

        let partial = aggregator.take_partial();
        assert_eq!(partial.len(), 2);
        assert!(aggregator.stations().is_empty());
        assert_eq!(aggregator.counters().records, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_flushes_partials_and_final_map() {
        let (batch_tx, batch_rx) = mpsc::channel(4);
        let (partial_tx, mut partial_rx) = mpsc::channel(16);
        let stats = Arc::new(PipelineStats::new());
        let shared = Arc::new(Mutex::new(batch_rx));

        let worker_stats = stats.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_aggregator_worker(0, shared, partial_tx, Some(2), worker_stats)
        });

        for i in 0..5 {
            let line = format!("S;{i}.0\n");
            batch_tx.send(LineBatch::new(0, line.into_bytes())).await.unwrap();
        }
        drop(batch_tx);

        let counters = handle.await.unwrap().unwrap();
        assert_eq!(counters.batches, 5);
        assert_eq!(counters.records, 5);

        let mut partials = Vec::new();
        while let Some(partial) = partial_rx.recv().await {
            partials.push(partial);
        }
        // Flushed after batches 2 and 4, then the remainder at shutdown
        assert_eq!(partials.len(), 3);
        let total: u64 = partials.iter().map(|p| p["S"].count).sum();
        assert_eq!(total, 5);
        assert_eq!(stats.snapshot().records_aggregated, 5);
    }
}
