pub mod aggregate;
pub mod aggregator;
pub mod error;
pub mod merger;
pub mod pipeline;
pub mod planner;
pub mod reader;
pub mod stats;

// Re-export main types for convenient access
pub use aggregate::{Aggregate, StationMap};
pub use error::{MalformedRecord, PipelineError};
pub use merger::{ResultMerger, Summary};
pub use planner::{ByteRange, ChunkPlanner};
pub use reader::{ChunkExtractor, LineBatch, ReaderConfig, SourceMode};

// Re-export pipeline entry points for the CLI, benchmarks and integration tests
pub use pipeline::{
    aggregate_file, aggregate_file_with_stats,
    BlankLinePolicy, PipelineConfig, PipelineOutput
};
pub use stats::{PipelineStats, RunStats, StatsSnapshot};
