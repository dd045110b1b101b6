//! Output units of the binning engine

/// One (time bin × range bin × channel) cell.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBin {
    /// Start of the time bin, nanoseconds since the Unix epoch.
    pub ping_time: i64,
    pub channel: String,
    /// Index of the range bin; the bin covers `[index * width, (index + 1) * width)`.
    pub range_bin: i64,
    /// Midpoint of the range bin in metres.
    pub depth: f64,
    /// Reduced value in dB, NaN when no valid sample fell in the cell.
    pub value: f64,
    /// Number of valid samples that contributed.
    pub count: u32,
}

/// One time bin of a resampled position / bottom-depth track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBin {
    pub ping_time: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    /// Pings that fell in the bin, zero for gap bins.
    pub count: u32,
}

impl TrackBin {
    pub fn is_complete(&self) -> bool {
        !(self.latitude.is_nan() || self.longitude.is_nan() || self.depth.is_nan())
    }
}
