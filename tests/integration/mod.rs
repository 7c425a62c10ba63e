// Integration test utilities and common code

#![allow(dead_code)]

use chunkagg::{PipelineConfig, ReaderConfig, SourceMode, StationMap};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test fixture helper for creating temporary measurement files
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub root_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with temporary directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root_path = temp_dir.path().to_path_buf();

        Self {
            temp_dir,
            root_path,
        }
    }

    /// Create a measurement file with given content
    pub fn create_measurements<P: AsRef<Path>>(&self, relative_path: P, content: &str) -> PathBuf {
        let file_path = self.root_path.join(relative_path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }

        fs::write(&file_path, content).expect("Failed to write test file");
        file_path
    }
}

/// Pipeline configuration small enough to exercise many chunks on tiny inputs
pub fn config_with(chunk_size: u64, extractors: usize, aggregators: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        extractors,
        aggregators,
        task_queue_capacity: 4,
        batch_queue_capacity: 4,
        partial_queue_capacity: 2,
        reader: ReaderConfig {
            scan_window: 16,
            mode: SourceMode::Buffered,
        },
        ..PipelineConfig::default()
    }
}

/// Reference result computed sequentially without the pipeline
pub fn sequential_reference(content: &str) -> StationMap {
    let mut map = StationMap::new();
    for line in content.lines() {
        if let Some((station, value)) = line.split_once(';') {
            if let Ok(value) = value.parse::<f64>() {
                chunkagg::aggregate::observe_into(&mut map, station, value);
            }
        }
    }
    map
}

/// Compare two station maps: min, max and count exactly, sums within rounding
pub fn assert_same_stations(actual: &StationMap, expected: &StationMap, context: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{context}: station count mismatch"
    );

    for (station, want) in expected {
        let got = actual
            .get(station)
            .unwrap_or_else(|| panic!("{context}: missing station {station}"));
        assert_eq!(got.count, want.count, "{context}: count of {station}");
        assert_eq!(got.min.to_bits(), want.min.to_bits(), "{context}: min of {station}");
        assert_eq!(got.max.to_bits(), want.max.to_bits(), "{context}: max of {station}");
        assert!(
            (got.sum - want.sum).abs() < 1e-6 * want.count as f64,
            "{context}: sum of {station}: {} vs {}",
            got.sum,
            want.sum
        );
    }
}
