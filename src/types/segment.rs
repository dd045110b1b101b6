//! Columnar in-memory table of one file's worth of pings

use std::ops::Range;

use bon::bon;
use ndarray::{Array1, Array3, Axis, s};

use crate::error::{EchoError, Result};
use crate::types::channel::Channel;
use crate::types::header::SegmentKind;
use crate::types::ping::Ping;

/// Two range coordinates closer than this (metres) everywhere are treated
/// as one when segments are stitched together.
pub const RANGE_TOLERANCE_M: f64 = 1e-3;

/// An ordered run of pings from one source file.
///
/// `values` is laid out as `(ping, channel, range_sample)`. Timestamps are
/// nanoseconds since the Unix epoch and must be non-decreasing; the segment
/// never reorders them.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub channels: Vec<Channel>,
    pub ping_time: Vec<i64>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub values: Array3<f64>,
    /// Range coordinate: depth in metres of every range sample.
    pub depth: Option<Array1<f64>>,
    /// Coordinates that replace `depth` from the given ping index on, in
    /// increasing order. Empty unless segments with different coordinates
    /// were joined.
    pub range_changes: Vec<(usize, Array1<f64>)>,
    pub sample_interval: f64,
    pub sound_speed: f64,
}

#[bon]
impl Segment {
    #[builder]
    pub fn new(
        kind: SegmentKind,
        channels: Vec<Channel>,
        ping_time: Vec<i64>,
        latitude: Option<Vec<f64>>,
        longitude: Option<Vec<f64>>,
        values: Array3<f64>,
        depth: Option<Array1<f64>>,
        #[builder(default = 0.0)] sample_interval: f64,
        #[builder(default = 1500.0)] sound_speed: f64,
    ) -> Result<Self> {
        let (pings, channel_count, samples) = values.dim();
        if pings != ping_time.len() {
            return Err(EchoError::ContractViolation(format!(
                "{} timestamps for {} pings of values",
                ping_time.len(),
                pings
            )));
        }
        if channel_count != channels.len() {
            return Err(EchoError::ContractViolation(format!(
                "{} channels declared but values hold {}",
                channels.len(),
                channel_count
            )));
        }
        if let Some(depth) = &depth {
            if depth.len() != samples {
                return Err(EchoError::ContractViolation(format!(
                    "range coordinate has {} entries for {} range samples",
                    depth.len(),
                    samples
                )));
            }
        }
        let latitude = latitude.unwrap_or_else(|| vec![f64::NAN; pings]);
        let longitude = longitude.unwrap_or_else(|| vec![f64::NAN; pings]);
        if latitude.len() != pings || longitude.len() != pings {
            return Err(EchoError::ContractViolation(
                "position columns do not match the ping count".to_string(),
            ));
        }

        Ok(Self {
            kind,
            channels,
            ping_time,
            latitude,
            longitude,
            values,
            depth,
            range_changes: Vec::new(),
            sample_interval,
            sound_speed,
        })
    }
}

impl Segment {
    /// Build a segment from per-ping records. Short channels are padded with NaN.
    pub fn from_pings(
        kind: SegmentKind,
        channels: Vec<Channel>,
        pings: &[Ping],
        depth: Option<Array1<f64>>,
    ) -> Result<Self> {
        let samples = depth
            .as_ref()
            .map(|d| d.len())
            .unwrap_or_else(|| pings.iter().map(Ping::sample_count).max().unwrap_or(0));
        let mut values = Array3::from_elem((pings.len(), channels.len(), samples), f64::NAN);

        for (p, ping) in pings.iter().enumerate() {
            if ping.values.len() > channels.len() {
                return Err(EchoError::ContractViolation(format!(
                    "ping at {} carries {} channels, expected {}",
                    ping.timestamp,
                    ping.values.len(),
                    channels.len()
                )));
            }
            for (c, channel_values) in ping.values.iter().enumerate() {
                for (i, &v) in channel_values.iter().take(samples).enumerate() {
                    values[[p, c, i]] = v;
                }
            }
        }

        Segment::builder()
            .kind(kind)
            .channels(channels)
            .ping_time(pings.iter().map(|p| p.timestamp).collect())
            .latitude(pings.iter().map(|p| p.latitude).collect())
            .longitude(pings.iter().map(|p| p.longitude).collect())
            .values(values)
            .maybe_depth(depth)
            .build()
    }

    pub fn len(&self) -> usize {
        self.ping_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ping_time.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.values.dim().2
    }

    pub fn range_coordinate(&self) -> Result<&Array1<f64>> {
        self.depth.as_ref().ok_or_else(|| {
            EchoError::ContractViolation("segment has no range coordinate".to_string())
        })
    }

    /// Ping ranges together with the range coordinate each was recorded with.
    pub fn range_runs(&self) -> Result<Vec<(Range<usize>, &Array1<f64>)>> {
        let mut coordinate = self.range_coordinate()?;
        let mut runs = Vec::with_capacity(self.range_changes.len() + 1);
        let mut start = 0;
        for (at, next) in &self.range_changes {
            runs.push((start..*at, coordinate));
            start = *at;
            coordinate = next;
        }
        runs.push((start..self.len(), coordinate));
        Ok(runs)
    }

    /// Range coordinate in effect at `ping`.
    fn coordinate_at(&self, ping: usize) -> Option<&Array1<f64>> {
        self.range_changes
            .iter()
            .rev()
            .find(|(at, _)| *at <= ping)
            .map(|(_, coordinate)| coordinate)
            .or(self.depth.as_ref())
    }

    /// Copy of the pings in `range`.
    pub fn slice_pings(&self, range: Range<usize>) -> Segment {
        let range_changes = self
            .range_changes
            .iter()
            .filter(|(at, _)| *at > range.start && *at < range.end)
            .map(|(at, coordinate)| (at - range.start, coordinate.clone()))
            .collect();
        Segment {
            kind: self.kind,
            channels: self.channels.clone(),
            ping_time: self.ping_time[range.clone()].to_vec(),
            latitude: self.latitude[range.clone()].to_vec(),
            longitude: self.longitude[range.clone()].to_vec(),
            depth: self.coordinate_at(range.start).cloned(),
            values: self.values.slice(s![range, .., ..]).to_owned(),
            range_changes,
            sample_interval: self.sample_interval,
            sound_speed: self.sound_speed,
        }
    }

    /// Splits into `[0, at)` and `[at, len)`.
    pub fn split_at(self, at: usize) -> (Segment, Segment) {
        let at = at.min(self.len());
        let head = self.slice_pings(0..at);
        let tail = self.slice_pings(at..self.len());
        (head, tail)
    }

    /// Whether `next` can be appended to `self` by [`Segment::concat`].
    pub fn check_concat(&self, next: &Segment) -> Result<()> {
        if self.is_empty() || next.is_empty() {
            return Ok(());
        }
        if self.kind != next.kind {
            return Err(EchoError::ContractViolation(format!(
                "cannot join a {:?} segment with a {:?} segment",
                self.kind, next.kind
            )));
        }
        let ids = |s: &Segment| s.channels.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        if ids(self) != ids(next) {
            return Err(EchoError::ContractViolation(format!(
                "channel layout changed between segments: {:?} then {:?}",
                ids(self),
                ids(next)
            )));
        }
        if self.depth.is_some() != next.depth.is_some() {
            return Err(EchoError::ContractViolation(
                "range coordinate present in only one of two adjacent segments".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends `next` after `self` without reordering anything.
    ///
    /// Both halves must describe the same channels. Each ping keeps the range
    /// coordinate it was recorded with; the shorter sample axis is padded with NaN.
    pub fn concat(self, next: Segment) -> Result<Segment> {
        self.check_concat(&next)?;
        if self.is_empty() {
            return Ok(next);
        }
        if next.is_empty() {
            return Ok(self);
        }

        let offset = self.len();
        let samples = self.sample_count().max(next.sample_count());
        let new_run = match (self.coordinate_at(offset - 1), next.depth.as_ref()) {
            (Some(last), Some(first)) if !same_coordinate(last, first) => Some(first.clone()),
            _ => None,
        };
        let mut range_changes = self.range_changes;
        range_changes.extend(new_run.map(|coordinate| (offset, coordinate)));
        range_changes.extend(
            next.range_changes
                .into_iter()
                .map(|(at, coordinate)| (at + offset, coordinate)),
        );

        let head = pad_samples(self.values, samples);
        let tail = pad_samples(next.values, samples);
        let values = ndarray::concatenate(Axis(0), &[head.view(), tail.view()])?;

        let mut ping_time = self.ping_time;
        ping_time.extend(next.ping_time);
        let mut latitude = self.latitude;
        latitude.extend(next.latitude);
        let mut longitude = self.longitude;
        longitude.extend(next.longitude);

        Ok(Segment {
            kind: self.kind,
            channels: self.channels,
            ping_time,
            latitude,
            longitude,
            values,
            depth: self.depth,
            range_changes,
            sample_interval: self.sample_interval,
            sound_speed: self.sound_speed,
        })
    }

    /// Same metadata and pings, different values.
    pub fn with_values(
        &self,
        kind: SegmentKind,
        values: Array3<f64>,
        depth: Option<Array1<f64>>,
    ) -> Result<Segment> {
        Segment::builder()
            .kind(kind)
            .channels(self.channels.clone())
            .ping_time(self.ping_time.clone())
            .latitude(self.latitude.clone())
            .longitude(self.longitude.clone())
            .values(values)
            .maybe_depth(depth)
            .sample_interval(self.sample_interval)
            .sound_speed(self.sound_speed)
            .build()
    }
}

pub(crate) fn check_non_decreasing(times: &[i64]) -> Result<()> {
    match times.windows(2).position(|w| w[1] < w[0]) {
        Some(i) => Err(EchoError::ContractViolation(format!(
            "timestamps go backwards at ping {} ({} after {})",
            i + 1,
            times[i + 1],
            times[i]
        ))),
        None => Ok(()),
    }
}

fn pad_samples(values: Array3<f64>, samples: usize) -> Array3<f64> {
    let (pings, channels, current) = values.dim();
    if current == samples {
        return values;
    }
    let mut padded = Array3::from_elem((pings, channels, samples), f64::NAN);
    padded.slice_mut(s![.., .., ..current]).assign(&values);
    padded
}

fn same_coordinate(a: &Array1<f64>, b: &Array1<f64>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| (x.is_nan() && y.is_nan()) || (x - y).abs() <= RANGE_TOLERANCE_M)
}
