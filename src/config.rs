//! Run configuration and bin-width parsing

use bon::Builder;
use clap::ValueEnum;

use crate::error::{EchoError, Result};
use crate::processing::engine::BinOrigin;
use crate::processing::reducers::Reducer;
use crate::utils::misc::NANOS_PER_SECOND;

pub const DEFAULT_PING_BIN: &str = "5s";
pub const DEFAULT_RANGE_BIN: &str = "1.0m";
pub const DEFAULT_TRACK_INTERVAL: &str = "60s";

/// Time × range gridding of Sv segments (MVBS).
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct GridConfig {
    /// Time bin width in nanoseconds.
    #[builder(default = 5 * NANOS_PER_SECOND)]
    pub ping_bin: i64,
    /// Range bin width in metres.
    #[builder(default = 1.0)]
    pub range_bin: f64,
    #[builder(default)]
    pub reducer: Reducer,
    #[builder(default)]
    pub origin: BinOrigin,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        check_time_width(self.ping_bin)?;
        if !self.range_bin.is_finite() || self.range_bin <= 0.0 {
            return Err(EchoError::Config(format!(
                "range bin width must be a positive number of metres, got {}",
                self.range_bin
            )));
        }
        if self.reducer == Reducer::Interpolate {
            return Err(EchoError::Config(
                "interpolation is only defined for track resampling".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resampling of position / bottom-depth tracks.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct TrackConfig {
    #[builder(default = 60 * NANOS_PER_SECOND)]
    pub interval: i64,
    #[builder(default = Reducer::LastValid)]
    pub reducer: Reducer,
    #[builder(default)]
    pub origin: BinOrigin,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TrackConfig {
    pub fn validate(&self) -> Result<()> {
        check_time_width(self.interval)?;
        if self.reducer == Reducer::MeanPower {
            return Err(EchoError::Config(
                "mean power is not meaningful for position and depth tracks".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct BottomConfig {
    /// Channel identifier or frequency (e.g. `38kHz`); the first channel when unset.
    #[builder(into)]
    pub channel: Option<String>,
    #[builder(default = -40.0)]
    pub threshold_db: f64,
    #[builder(default = 300)]
    pub skip_from_surface: usize,
    #[builder(default = 0.5)]
    pub offset_m: f64,
}

impl Default for BottomConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct DispatchConfig {
    #[builder(default = 4)]
    pub workers: usize,
    #[builder(default = 2)]
    pub threads: usize,
    #[builder(default)]
    pub skip_existing: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DispatchConfig {
    /// Size of the worker pool, `workers × threads`.
    pub fn pool_size(&self) -> Result<usize> {
        match self.workers.checked_mul(self.threads) {
            Some(0) | None => Err(EchoError::Config(format!(
                "worker pool of {} workers × {} threads is not usable",
                self.workers, self.threads
            ))),
            Some(n) => Ok(n),
        }
    }
}

/// How raw samples are encoded by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EncodeMode {
    #[default]
    Power,
    Complex,
}

/// Transmit waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WaveformMode {
    /// Continuous wave (narrowband).
    #[default]
    Cw,
    /// Broadband (FM).
    Bb,
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct CalibrationParams {
    #[builder(default)]
    pub encode_mode: EncodeMode,
    #[builder(default)]
    pub waveform_mode: WaveformMode,
    /// Metres added to every range sample's depth.
    #[builder(default = 1.0)]
    pub depth_offset: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn check_time_width(width: i64) -> Result<()> {
    if width <= 0 {
        return Err(EchoError::Config(format!(
            "time bin width must be positive, got {width} ns"
        )));
    }
    Ok(())
}

/// Splits `"12.5min"` into `(12.5, "min")`.
fn split_number(text: &str) -> Result<(f64, &str)> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| EchoError::Config(format!("'{text}' does not start with a number")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(EchoError::Config(format!(
            "'{text}' must be a positive, finite width"
        )));
    }
    Ok((value, unit.trim()))
}

/// Parses a time width such as `5s`, `500ms`, `1min`, `2T` or `1h` to nanoseconds.
pub fn parse_time_bin(text: &str) -> Result<i64> {
    let (value, unit) = split_number(text)?;
    let scale = match unit {
        "ns" => 1.0,
        "us" => 1e3,
        "ms" | "L" => 1e6,
        "s" | "S" | "" => 1e9,
        "min" | "m" | "T" => 60e9,
        "h" | "H" => 3_600e9,
        other => {
            return Err(EchoError::Config(format!(
                "unknown time unit '{other}' in '{text}'"
            )));
        }
    };
    let ns = (value * scale).round();
    if ns < 1.0 || ns > i64::MAX as f64 {
        return Err(EchoError::Config(format!("time width '{text}' is out of range")));
    }
    Ok(ns as i64)
}

/// Parses a range width such as `1.0m` or `0.5` to metres.
pub fn parse_range_bin(text: &str) -> Result<f64> {
    let (value, unit) = split_number(text)?;
    match unit {
        "m" | "" => Ok(value),
        other => Err(EchoError::Config(format!(
            "unknown range unit '{other}' in '{text}'"
        ))),
    }
}
