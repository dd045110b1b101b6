//! Per-ping records as they come off the instrument and as segments are built from them

use bon::Builder;

/// Conversion factor from raw power counts to dB.
pub const POWER_COUNT_TO_DB: f64 = 10.0 * std::f64::consts::LOG10_2 / 256.0;

/// A single `PNG0` datagram: one channel's samples for one transmit cycle.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct PingDatagram {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub channel_index: u16,
    pub power: Vec<i16>,
}

impl PingDatagram {
    pub fn power_db(&self) -> impl Iterator<Item = f64> + '_ {
        self.power.iter().map(|&count| count as f64 * POWER_COUNT_TO_DB)
    }
}

/// One timestamped observation across all channels.
///
/// `values[channel][range_sample]` is in dB; NaN marks a missing sample.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct Ping {
    pub timestamp: i64,
    #[builder(default = f64::NAN)]
    pub latitude: f64,
    #[builder(default = f64::NAN)]
    pub longitude: f64,
    pub bottom_depth: Option<f64>,
    pub values: Vec<Vec<f64>>,
}

impl Ping {
    pub fn sample_count(&self) -> usize {
        self.values.iter().map(Vec::len).max().unwrap_or(0)
    }
}
