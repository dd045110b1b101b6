//! Time × range × channel gridding of Sv segments (MVBS)

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array1;

use crate::config::GridConfig;
use crate::error::{EchoError, Result};
use crate::processing::engine::{Aggregator, BinningEngine, TimeBin};
use crate::processing::reducers::{Reducer, last_valid, mean_power};
use crate::types::{AggregatedBin, Segment, SegmentKind};

/// Reduces complete time bins of an Sv segment into range-binned cells.
#[derive(Debug, Clone)]
pub struct GridAggregator {
    range_bin: f64,
    reducer: Reducer,
}

impl GridAggregator {
    pub fn new(config: &GridConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            range_bin: config.range_bin,
            reducer: config.reducer,
        })
    }

    /// Sample indices of every range bin, keyed by range-bin index.
    /// Samples with a NaN depth belong to no bin.
    fn range_bins(&self, depth: &Array1<f64>) -> BTreeMap<i64, Vec<usize>> {
        let mut bins: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, &d) in depth.iter().enumerate() {
            if d.is_finite() {
                bins.entry((d / self.range_bin).floor() as i64).or_default().push(i);
            }
        }
        bins
    }

    fn reduce(&self, samples: impl Iterator<Item = f64>) -> (f64, u32) {
        match self.reducer {
            Reducer::LastValid => last_valid(samples),
            _ => mean_power(samples),
        }
    }
}

impl Aggregator for GridAggregator {
    type Input = Segment;
    type Output = AggregatedBin;

    fn aggregate(&mut self, data: &Segment, bins: &[TimeBin]) -> Result<Vec<AggregatedBin>> {
        if bins.iter().all(TimeBin::is_empty) {
            return Ok(Vec::new());
        }
        if data.kind != SegmentKind::Sv {
            return Err(EchoError::ContractViolation(
                "gridding requires a calibrated Sv segment".to_string(),
            ));
        }
        let runs: Vec<_> = data
            .range_runs()?
            .into_iter()
            .map(|(pings, depth)| (pings, self.range_bins(depth)))
            .collect();

        let mut out = Vec::new();
        for bin in bins.iter().filter(|b| !b.is_empty()) {
            // Pings of this time bin, split by the range coordinate they were recorded with.
            let overlapping: Vec<_> = runs
                .iter()
                .map(|(pings, range_bins)| {
                    let start = pings.start.max(bin.pings.start);
                    (start..pings.end.min(bin.pings.end).max(start), range_bins)
                })
                .filter(|(pings, _)| !pings.is_empty())
                .collect();
            let keys: BTreeSet<i64> = overlapping
                .iter()
                .flat_map(|(_, range_bins)| range_bins.keys().copied())
                .collect();

            for (c, channel) in data.channels.iter().enumerate() {
                for &k in &keys {
                    let cell = overlapping.iter().flat_map(move |(pings, range_bins)| {
                        let samples = range_bins.get(&k).map(Vec::as_slice).unwrap_or_default();
                        pings
                            .clone()
                            .flat_map(move |p| samples.iter().map(move |&i| data.values[[p, c, i]]))
                    });
                    let (value, count) = self.reduce(cell);
                    out.push(AggregatedBin {
                        ping_time: bin.start,
                        channel: channel.id.clone(),
                        range_bin: k,
                        depth: (k as f64 + 0.5) * self.range_bin,
                        value,
                        count,
                    });
                }
            }
        }
        Ok(out)
    }

    fn dense_bins(&self) -> bool {
        false
    }
}

pub type GridEngine = BinningEngine<GridAggregator>;

/// Engine producing MVBS cells for one stream of Sv segments.
pub fn grid_engine(config: &GridConfig) -> Result<GridEngine> {
    BinningEngine::new(GridAggregator::new(config)?, config.ping_bin, config.origin)
}

/// Grids a whole, already-loaded stream in one go.
pub fn grid_segments<I>(config: &GridConfig, segments: I) -> Result<Vec<AggregatedBin>>
where
    I: IntoIterator<Item = Segment>,
{
    let mut engine = grid_engine(config)?;
    let mut out = Vec::new();
    for segment in segments {
        out.extend(engine.process(segment)?);
    }
    out.extend(engine.finalize()?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;
    use approx::assert_relative_eq;
    use ndarray::{Array3, array};

    const S: i64 = 1_000_000_000;

    fn sv_segment(times: &[i64], value: impl Fn(usize, usize, usize) -> f64) -> Segment {
        let samples = 4;
        let values = Array3::from_shape_fn((times.len(), 1, samples), |(p, c, i)| value(p, c, i));
        Segment::builder()
            .kind(SegmentKind::Sv)
            .channels(vec![Channel::builder().id("38k").frequency_hz(38_000.0).build()])
            .ping_time(times.to_vec())
            .values(values)
            .depth(Array1::from(vec![0.25, 0.75, 1.25, 1.75]))
            .build()
            .unwrap()
    }

    #[test]
    fn cells_hold_log_domain_mean() {
        let config = GridConfig::builder().ping_bin(5 * S).build();
        let values = [-60.0, -60.0, -30.0];
        let seg = sv_segment(&[0, S, 2 * S], |p, _, _| values[p]);
        let bins = grid_segments(&config, [seg]).unwrap();

        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].range_bin, 0);
        assert_relative_eq!(bins[0].depth, 0.5);
        assert_eq!(bins[0].count, 6);
        let expected = 10.0 * ((2e-6 + 1e-3) / 3.0f64).log10();
        assert_relative_eq!(bins[0].value, expected, epsilon = 1e-9);
        assert_relative_eq!(bins[1].depth, 1.5);
    }

    #[test]
    fn empty_time_bins_produce_no_cells() {
        let config = GridConfig::default();
        let seg = sv_segment(&[0, 20 * S], |_, _, _| -50.0);
        let bins = grid_segments(&config, [seg]).unwrap();
        let times: Vec<i64> = bins.iter().map(|b| b.ping_time).collect();
        assert_eq!(times, vec![0, 0, 20 * S, 20 * S]);
    }

    #[test]
    fn all_nan_cell_is_nan_with_zero_count() {
        let config = GridConfig::default();
        let seg = sv_segment(&[0], |_, _, i| if i < 2 { f64::NAN } else { -70.0 });
        let bins = grid_segments(&config, [seg]).unwrap();
        assert!(bins[0].value.is_nan());
        assert_eq!(bins[0].count, 0);
        assert_relative_eq!(bins[1].value, -70.0, epsilon = 1e-9);
    }

    #[test]
    fn last_valid_picks_latest_ping() {
        let config = GridConfig::builder().reducer(Reducer::LastValid).build();
        let seg = sv_segment(&[0, S, 2 * S], |p, _, _| if p == 2 { f64::NAN } else { -(p as f64) });
        let bins = grid_segments(&config, [seg]).unwrap();
        assert_eq!(bins[0].value, -1.0);
    }

    #[test]
    fn pings_bin_by_their_own_range_coordinate() {
        let config = GridConfig::builder().ping_bin(10 * S).build();
        let mut engine = grid_engine(&config).unwrap();

        let mut first = sv_segment(&[0, S], |_, _, _| -60.0);
        first.depth = Some(array![0.995, 1.495, 1.995, 2.495]);
        let mut second = sv_segment(&[2 * S, 3 * S, 20 * S], |_, _, _| -30.0);
        second.depth = Some(array![1.005, 1.505, 2.005, 2.505]);

        assert!(engine.process(first).unwrap().is_empty());
        let bins = engine.process(second).unwrap();
        let cells: Vec<(i64, u32)> = bins.iter().map(|b| (b.range_bin, b.count)).collect();
        assert_eq!(cells, vec![(0, 2), (1, 8), (2, 6)]);
        assert_relative_eq!(bins[0].value, -60.0, epsilon = 1e-9);
        let mixed = 10.0 * ((4e-6 + 4e-3) / 8.0f64).log10();
        assert_relative_eq!(bins[1].value, mixed, epsilon = 1e-9);

        let tail = engine.finalize().unwrap();
        let cells: Vec<(i64, u32)> = tail.iter().map(|b| (b.range_bin, b.count)).collect();
        assert_eq!(cells, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn missing_range_coordinate_is_contract_violation() {
        let mut seg = sv_segment(&[0, 10 * S], |_, _, _| -50.0);
        seg.depth = None;
        let err = grid_segments(&GridConfig::default(), [seg]).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn power_segment_is_rejected() {
        let mut seg = sv_segment(&[0, 10 * S], |_, _, _| -50.0);
        seg.kind = SegmentKind::Power;
        assert!(grid_segments(&GridConfig::default(), [seg]).unwrap_err().is_contract_violation());
    }
}
