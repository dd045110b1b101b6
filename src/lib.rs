pub mod calibration;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod processing;
pub mod raw_file;
pub mod segment_file;
pub mod sink;
pub mod stages;
pub mod types;
pub mod utils;

pub use calibration::{Calibration, CalibrationProvider, SonarEquation};
pub use config::{BottomConfig, CalibrationParams, DispatchConfig, GridConfig, TrackConfig};
pub use dispatch::{Dispatcher, RunSummary, Stage, StageStatus, WorkItem};
pub use error::{EchoError, Result};
pub use processing::{
    Aggregator, BinOrigin, BinningEngine, BottomDetector, GridEngine, Reducer, TimeBin, TrackEngine,
};
pub use raw_file::RawFile;
pub use segment_file::{SegmentFile, read_segment};
pub use types::{AggregatedBin, Channel, Ping, Segment, SegmentKind, Track, TrackBin};
