//! Per-cell reduction functions and the streaming gap filler

use std::fmt;
use std::str::FromStr;

use crate::error::EchoError;

/// How the samples that fall into one bin are reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducer {
    /// Average in the linear domain, report in dB.
    #[default]
    MeanPower,
    /// Most recent non-NaN sample by timestamp.
    LastValid,
    /// Bin values are filled across empty bins by linear interpolation in time.
    Interpolate,
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::MeanPower => "mean",
            Reducer::LastValid => "last",
            Reducer::Interpolate => "interpolate",
        };
        f.write_str(name)
    }
}

impl FromStr for Reducer {
    type Err = EchoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "mean-power" | "mean_power" => Ok(Reducer::MeanPower),
            "last" | "last-valid" | "last_valid" => Ok(Reducer::LastValid),
            "interpolate" | "linear" => Ok(Reducer::Interpolate),
            other => Err(EchoError::Config(format!("unknown reducer '{other}'"))),
        }
    }
}

/// Log-domain mean: `10 * log10(mean(10^(v/10)))` over the non-NaN samples.
///
/// Returns the reduced value and the number of samples that contributed;
/// the value is NaN when nothing contributed.
pub fn mean_power<I>(values: I) -> (f64, u32)
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0u32), |(sum, count), v| {
            (sum + 10f64.powf(v / 10.0), count + 1)
        });
    if count == 0 {
        return (f64::NAN, 0);
    }
    (10.0 * (sum / count as f64).log10(), count)
}

/// Last non-NaN sample of a time-ordered sequence.
pub fn last_valid<I>(values: I) -> (f64, u32)
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((f64::NAN, 0u32), |(_, count), v| (v, count + 1))
}

/// Plain arithmetic mean of the non-NaN samples.
pub fn arithmetic_mean<I>(values: I) -> (f64, u32)
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0u32), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        (f64::NAN, 0)
    } else {
        (sum / count as f64, count)
    }
}

/// Linear interpolation between `(t0, v0)` and `(t1, v1)` evaluated at `t`.
pub fn interpolate_at(t0: i64, v0: f64, t1: i64, v1: f64, t: i64) -> f64 {
    if t1 == t0 {
        return v0;
    }
    let fraction = (t - t0) as f64 / (t1 - t0) as f64;
    v0 + (v1 - v0) * fraction
}

/// Streaming linear gap filling along the time axis.
///
/// Values are pushed in time order. A NaN is held back until the next valid
/// value arrives and is then replaced by interpolating between its two valid
/// neighbours. Gaps with no valid value before them are released as NaN
/// immediately; gaps still pending at [`GapFiller::finish`] are released as NaN.
/// Every pushed time is emitted exactly once, in push order.
#[derive(Debug, Default, Clone)]
pub struct GapFiller {
    previous: Option<(i64, f64)>,
    pending: Vec<i64>,
}

impl GapFiller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: i64, value: f64) -> Vec<(i64, f64)> {
        if value.is_nan() {
            return match self.previous {
                None => vec![(time, f64::NAN)],
                Some(_) => {
                    self.pending.push(time);
                    Vec::new()
                }
            };
        }

        let mut resolved = Vec::with_capacity(self.pending.len() + 1);
        if let Some((t0, v0)) = self.previous {
            resolved.extend(
                self.pending
                    .drain(..)
                    .map(|t| (t, interpolate_at(t0, v0, time, value, t))),
            );
        }
        resolved.push((time, value));
        self.previous = Some((time, value));
        resolved
    }

    /// Releases pending times with no following valid value as NaN.
    pub fn finish(&mut self) -> Vec<(i64, f64)> {
        self.pending.drain(..).map(|t| (t, f64::NAN)).collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Fills interior NaN gaps of a whole series by linear interpolation in time.
pub fn interpolate_gaps(times: &[i64], values: &[f64]) -> Vec<f64> {
    let mut filler = GapFiller::new();
    let mut out: Vec<f64> = times
        .iter()
        .zip(values)
        .flat_map(|(&t, &v)| filler.push(t, v))
        .map(|(_, v)| v)
        .collect();
    out.extend(filler.finish().into_iter().map(|(_, v)| v));
    out
}
