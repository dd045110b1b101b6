//! Time resampling of position and bottom-depth tracks

use std::collections::VecDeque;

use crate::config::TrackConfig;
use crate::error::Result;
use crate::processing::engine::{Aggregator, BinningEngine, TimeBin};
use crate::processing::reducers::{GapFiller, Reducer, arithmetic_mean, last_valid};
use crate::types::{Track, TrackBin};

const FIELDS: usize = 3;

/// Resamples a track onto a regular time grid.
///
/// With [`Reducer::LastValid`] each bin takes the last valid value of each
/// field. With [`Reducer::Interpolate`] each bin takes the mean of its valid
/// values and bins left empty are filled by linear interpolation between
/// their valid neighbours; bins with no valid neighbour on one side stay NaN.
/// Gap bins are held back until they can be resolved, so output may lag the
/// input by a few bins until the engine is finalized.
#[derive(Debug)]
pub struct TrackAggregator {
    reducer: Reducer,
    fillers: [GapFiller; FIELDS],
    queue: VecDeque<TrackBin>,
    /// Bins already released from the front of `queue`.
    released: usize,
    /// Values resolved so far, per field.
    resolved: [usize; FIELDS],
}

impl TrackAggregator {
    pub fn new(config: &TrackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reducer: config.reducer,
            fillers: Default::default(),
            queue: VecDeque::new(),
            released: 0,
            resolved: [0; FIELDS],
        })
    }

    fn reduce_bin(&self, data: &Track, bin: &TimeBin) -> TrackBin {
        let reduce = |column: &[f64]| {
            let values = column[bin.pings.clone()].iter().copied();
            match self.reducer {
                Reducer::Interpolate => arithmetic_mean(values).0,
                _ => last_valid(values).0,
            }
        };
        TrackBin {
            ping_time: bin.start,
            latitude: reduce(&data.latitude),
            longitude: reduce(&data.longitude),
            depth: reduce(&data.bottom_depth),
            count: bin.pings.len() as u32,
        }
    }

    fn apply(&mut self, field: usize, resolved: Vec<(i64, f64)>) {
        for (_, value) in resolved {
            let slot = self.resolved[field] - self.released;
            if let Some(bin) = self.queue.get_mut(slot) {
                match field {
                    0 => bin.latitude = value,
                    1 => bin.longitude = value,
                    _ => bin.depth = value,
                }
            }
            self.resolved[field] += 1;
        }
    }

    fn release_resolved(&mut self) -> Vec<TrackBin> {
        let ready = self.resolved.iter().min().copied().unwrap_or(0) - self.released;
        self.released += ready;
        self.queue.drain(..ready).collect()
    }
}

impl Aggregator for TrackAggregator {
    type Input = Track;
    type Output = TrackBin;

    fn aggregate(&mut self, data: &Track, bins: &[TimeBin]) -> Result<Vec<TrackBin>> {
        let reduced: Vec<TrackBin> = bins.iter().map(|b| self.reduce_bin(data, b)).collect();
        if self.reducer != Reducer::Interpolate {
            return Ok(reduced);
        }

        for bin in reduced {
            let values = [bin.latitude, bin.longitude, bin.depth];
            let time = bin.ping_time;
            self.queue.push_back(bin);
            for (field, value) in values.into_iter().enumerate() {
                let resolved = self.fillers[field].push(time, value);
                self.apply(field, resolved);
            }
        }
        Ok(self.release_resolved())
    }

    fn flush(&mut self) -> Result<Vec<TrackBin>> {
        for field in 0..FIELDS {
            let resolved = self.fillers[field].finish();
            self.apply(field, resolved);
        }
        Ok(self.release_resolved())
    }
}

pub type TrackEngine = BinningEngine<TrackAggregator>;

pub fn track_engine(config: &TrackConfig) -> Result<TrackEngine> {
    BinningEngine::new(TrackAggregator::new(config)?, config.interval, config.origin)
}

/// Resamples a whole, already-loaded sequence of tracks.
pub fn resample_tracks<I>(config: &TrackConfig, tracks: I) -> Result<Vec<TrackBin>>
where
    I: IntoIterator<Item = Track>,
{
    let mut engine = track_engine(config)?;
    let mut out = Vec::new();
    for track in tracks {
        out.extend(engine.process(track)?);
    }
    out.extend(engine.finalize()?);
    Ok(out)
}
