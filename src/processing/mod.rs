//! Streaming binning engine, reducers and the detectors built on them

pub mod bottom;
pub mod engine;
pub mod grid;
pub mod reducers;
pub mod track;

// Re-export for easier access
pub use bottom::BottomDetector;
pub use engine::{Aggregator, BinOrigin, Binnable, BinningEngine, TimeBin};
pub use grid::{GridAggregator, GridEngine, grid_engine, grid_segments};
pub use reducers::{GapFiller, Reducer, interpolate_gaps, last_valid, mean_power};
pub use track::{TrackAggregator, TrackEngine, resample_tracks, track_engine};
