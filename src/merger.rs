use crate::aggregate::{merge_maps, Aggregate, StationMap};
use crate::stats::PipelineStats;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Folds partial maps into the single global map
///
/// Owned by one task; the global map is never shared while merging is in progress.
#[derive(Debug, Default)]
pub struct ResultMerger {
    global: StationMap,
    partials_merged: u64,
}

impl ResultMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, partial: StationMap) {
        merge_maps(&mut self.global, partial);
        self.partials_merged += 1;
    }

    pub fn partials_merged(&self) -> u64 {
        self.partials_merged
    }

    pub fn finish(self) -> Summary {
        Summary::new(self.global)
    }

    /// Merge partials until every sender has been dropped and the queue is empty
    pub async fn run(mut self, mut partials: mpsc::Receiver<StationMap>, stats: Arc<PipelineStats>) -> Summary {
        let start_time = std::time::Instant::now();
        while let Some(partial) = partials.recv().await {
            debug!("Merging partial with {} stations", partial.len());
            self.merge(partial);
            PipelineStats::add(&stats.partials_merged, 1);
        }

        info!(
            "Merged {} partial results into {} stations in {}ms",
            self.partials_merged,
            self.global.len(),
            start_time.elapsed().as_millis()
        );
        self.finish()
    }
}

/// Final, read-only station table
///
/// `Display` renders `{name=min/mean/max, ...}` with one decimal place per value
/// and stations in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    stations: StationMap,
}

impl Summary {
    pub fn new(stations: StationMap) -> Self {
        Self { stations }
    }

    pub fn get(&self, station: &str) -> Option<&Aggregate> {
        self.stations.get(station)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn stations(&self) -> &StationMap {
        &self.stations
    }

    pub fn into_stations(self) -> StationMap {
        self.stations
    }

    /// Stations sorted by name
    pub fn sorted(&self) -> BTreeMap<&str, &Aggregate> {
        self.stations.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }
}

/// Round to the nearest tenth, never producing negative zero
pub fn round_tenth(value: f64) -> f64 {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (station, aggregate)) in self.sorted().into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{}={:.1}/{:.1}/{:.1}",
                station,
                round_tenth(aggregate.min),
                round_tenth(aggregate.mean()),
                round_tenth(aggregate.max)
            )?;
        }
        f.write_str("}")
    }
}
