//! Streaming, boundary-aware time binning
//!
//! The engine consumes one segment at a time in caller order, emits the time
//! bins that can no longer receive data, and carries the pings of the last
//! (incomplete) bin forward as leftover until the next segment or
//! [`BinningEngine::finalize`].

use std::ops::Range;

use tracing::debug;

use crate::error::{EchoError, Result};
use crate::types::segment::check_non_decreasing;
use crate::types::{Segment, Track};
use crate::utils::misc::{floor_div, format_duration_ns};

/// Where time-bin boundaries are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinOrigin {
    /// Multiples of the bin width since the Unix epoch.
    #[default]
    Epoch,
    /// The first timestamp the engine sees.
    FirstPing,
}

/// One complete time bin handed to an [`Aggregator`].
///
/// `pings` indexes into the data passed alongside; it is empty for a bin
/// that no ping fell into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBin {
    pub start: i64,
    pub width: i64,
    pub pings: Range<usize>,
}

impl TimeBin {
    pub fn end(&self) -> i64 {
        self.start + self.width
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }
}

/// Time-ordered data the engine can cut into bins and carry over.
pub trait Binnable: Sized {
    fn times(&self) -> &[i64];
    fn slice(&self, range: Range<usize>) -> Self;
    fn concat(self, next: Self) -> Result<Self>;

    /// Whether `concat(next)` would succeed, checked without consuming either side.
    fn check_concat(&self, _next: &Self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.times().len()
    }

    fn is_empty(&self) -> bool {
        self.times().is_empty()
    }
}

impl Binnable for Segment {
    fn times(&self) -> &[i64] {
        &self.ping_time
    }

    fn slice(&self, range: Range<usize>) -> Self {
        self.slice_pings(range)
    }

    fn concat(self, next: Self) -> Result<Self> {
        Segment::concat(self, next)
    }

    fn check_concat(&self, next: &Self) -> Result<()> {
        Segment::check_concat(self, next)
    }
}

impl Binnable for Track {
    fn times(&self) -> &[i64] {
        &self.ping_time
    }

    fn slice(&self, range: Range<usize>) -> Self {
        Track::slice(self, range)
    }

    fn concat(self, next: Self) -> Result<Self> {
        Ok(Track::concat(self, next))
    }
}

/// Reduces complete time bins to output records.
pub trait Aggregator {
    type Input: Binnable;
    type Output;

    /// Reduce `bins`, in time order. Every bin is complete.
    fn aggregate(&mut self, data: &Self::Input, bins: &[TimeBin]) -> Result<Vec<Self::Output>>;

    /// Whether `aggregate` needs the bins no ping fell into. Aggregators that
    /// only reduce pings present can opt out and receive occupied bins only.
    fn dense_bins(&self) -> bool {
        true
    }

    /// Release anything held back across calls. Called once at end of stream.
    fn flush(&mut self) -> Result<Vec<Self::Output>> {
        Ok(Vec::new())
    }
}

/// Stateful binning engine for one ordered stream.
///
/// Not shareable between streams: each deployment gets its own instance and
/// feeds it from a single caller.
pub struct BinningEngine<A: Aggregator> {
    aggregator: A,
    bin_width: i64,
    origin: BinOrigin,
    anchor: Option<i64>,
    leftover: Option<A::Input>,
    last_time: Option<i64>,
}

impl<A: Aggregator> BinningEngine<A> {
    /// `bin_width` is in nanoseconds and must be positive.
    pub fn new(aggregator: A, bin_width: i64, origin: BinOrigin) -> Result<Self> {
        if bin_width <= 0 {
            return Err(EchoError::Config(format!(
                "time bin width must be positive, got {bin_width} ns"
            )));
        }
        Ok(Self {
            aggregator,
            bin_width,
            origin,
            anchor: None,
            leftover: None,
            last_time: None,
        })
    }

    pub fn bin_width(&self) -> i64 {
        self.bin_width
    }

    /// Anchor of the bin grid, fixed on the first non-empty `process` call.
    pub fn anchor(&self) -> Option<i64> {
        self.anchor
    }

    /// Pings held back because their bin may still grow.
    pub fn leftover(&self) -> Option<&A::Input> {
        self.leftover.as_ref()
    }

    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    /// Feed the next segment of the stream and return the bins it completed.
    ///
    /// Fails with `ContractViolation` if the segment is not time ordered,
    /// starts before data already seen, or cannot be joined to the leftover.
    /// All checks run before any state changes.
    pub fn process(&mut self, segment: A::Input) -> Result<Vec<A::Output>> {
        if segment.is_empty() {
            return Ok(Vec::new());
        }
        check_non_decreasing(segment.times())?;
        let first = segment.times()[0];
        if let Some(last) = self.last_time {
            if first < last {
                return Err(EchoError::ContractViolation(format!(
                    "segment starts at {first} ns, before the previous segment ended at {last} ns"
                )));
            }
        }

        if let Some(leftover) = &self.leftover {
            leftover.check_concat(&segment)?;
        }

        let anchor = *self.anchor.get_or_insert(match self.origin {
            BinOrigin::Epoch => 0,
            BinOrigin::FirstPing => first,
        });

        let working = match self.leftover.take() {
            Some(leftover) => leftover.concat(segment)?,
            None => segment,
        };
        let times = working.times();
        self.last_time = times.last().copied();

        let index_of = |t: i64| floor_div(t - anchor, self.bin_width);
        let first_bin = index_of(times[0]);
        let last_bin = index_of(times[times.len() - 1]);
        let cutoff = times.partition_point(|&t| index_of(t) < last_bin);

        let bins = self.complete_bins(times, anchor, first_bin, last_bin, cutoff);
        let emitted = if bins.is_empty() {
            Vec::new()
        } else {
            self.aggregator.aggregate(&working, &bins)?
        };

        debug!(
            width = %format_duration_ns(self.bin_width),
            complete_bins = bins.len(),
            emitted = emitted.len(),
            leftover_pings = working.len() - cutoff,
            "processed segment"
        );

        self.leftover = Some(if cutoff == 0 {
            working
        } else {
            working.slice(cutoff..working.len())
        });
        Ok(emitted)
    }

    /// Aggregate the leftover as a final, possibly short, bin and flush the
    /// aggregator. A second call returns nothing.
    pub fn finalize(&mut self) -> Result<Vec<A::Output>> {
        let mut out = Vec::new();
        if let (Some(leftover), Some(anchor)) = (self.leftover.take(), self.anchor) {
            if !leftover.is_empty() {
                let start = anchor + floor_div(leftover.times()[0] - anchor, self.bin_width) * self.bin_width;
                let bin = TimeBin {
                    start,
                    width: self.bin_width,
                    pings: 0..leftover.len(),
                };
                out.extend(self.aggregator.aggregate(&leftover, &[bin])?);
            }
        }
        out.extend(self.aggregator.flush()?);
        debug!(emitted = out.len(), "finalized stream");
        Ok(out)
    }

    /// Every bin from `first_bin` up to (excluding) `last_bin`. Bins no ping
    /// fell into are included only for aggregators that ask for dense bins.
    fn complete_bins(
        &self,
        times: &[i64],
        anchor: i64,
        first_bin: i64,
        last_bin: i64,
        cutoff: usize,
    ) -> Vec<TimeBin> {
        let bin_at = |index: i64, cursor: usize| {
            let end_time = anchor + (index + 1) * self.bin_width;
            let end = cursor + times[cursor..cutoff].partition_point(|&t| t < end_time);
            TimeBin {
                start: anchor + index * self.bin_width,
                width: self.bin_width,
                pings: cursor..end,
            }
        };

        if !self.aggregator.dense_bins() {
            let mut bins = Vec::new();
            let mut cursor = 0usize;
            while cursor < cutoff {
                let bin = bin_at(floor_div(times[cursor] - anchor, self.bin_width), cursor);
                cursor = bin.pings.end;
                bins.push(bin);
            }
            return bins;
        }

        let mut bins = Vec::with_capacity((last_bin - first_bin).max(0) as usize);
        let mut cursor = 0usize;
        for index in first_bin..last_bin {
            let bin = bin_at(index, cursor);
            cursor = bin.pings.end;
            bins.push(bin);
        }
        bins
    }
}
