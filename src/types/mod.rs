//! Type definitions for pings, segments, tracks and their on-disk headers

pub mod bins;
pub mod calibration;
pub mod channel;
pub mod header;
pub mod ping;
pub mod segment;
pub mod track;

// Re-export the main types for convenience
pub use bins::{AggregatedBin, TrackBin};
pub use calibration::{CalibrationReference, ChannelCalibration};
pub use channel::Channel;
pub use header::{RawChannel, RawHeader, SegmentHeader, SegmentKind};
pub use ping::{Ping, PingDatagram};
pub use segment::Segment;
pub use track::Track;
