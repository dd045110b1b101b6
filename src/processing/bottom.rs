//! Per-ping bottom-line detection

use ndarray::{ArrayView1, Axis, Slice};
use rayon::prelude::*;

use crate::config::BottomConfig;
use crate::error::{EchoError, Result};
use crate::types::{Segment, SegmentKind, Track};
use crate::utils::ChannelManager;

/// Threshold detector run independently on every ping of one channel.
#[derive(Debug, Clone)]
pub struct BottomDetector {
    channel: Option<String>,
    threshold_db: f64,
    skip_from_surface: usize,
    offset_m: f64,
}

impl BottomDetector {
    pub fn new(config: &BottomConfig) -> Result<Self> {
        if !config.threshold_db.is_finite() || !config.offset_m.is_finite() {
            return Err(EchoError::Config(
                "bottom threshold and offset must be finite".to_string(),
            ));
        }
        Ok(Self {
            channel: config.channel.clone(),
            threshold_db: config.threshold_db,
            skip_from_surface: config.skip_from_surface,
            offset_m: config.offset_m,
        })
    }

    /// Depth of the first sample past `skip_from_surface` whose value is below
    /// the threshold, plus the offset. NaN samples never trigger a detection.
    pub fn detect_profile(&self, profile: ArrayView1<f64>, depth: ArrayView1<f64>) -> Option<f64> {
        profile
            .iter()
            .zip(depth.iter())
            .skip(self.skip_from_surface)
            .find(|(value, d)| **value < self.threshold_db && d.is_finite())
            .map(|(_, d)| d + self.offset_m)
    }

    /// Bottom line of every ping of an Sv segment; NaN where nothing was found.
    pub fn detect(&self, segment: &Segment) -> Result<Track> {
        if segment.kind != SegmentKind::Sv {
            return Err(EchoError::ContractViolation(
                "bottom detection requires a calibrated Sv segment".to_string(),
            ));
        }
        let runs = segment.range_runs()?;
        let channel = match &self.channel {
            Some(selector) => ChannelManager::new(&segment.channels).resolve(selector)?,
            None if segment.channel_count() > 0 => 0,
            None => {
                return Err(EchoError::ContractViolation(
                    "segment has no channels".to_string(),
                ));
            }
        };

        let profiles = segment.values.index_axis(Axis(1), channel);
        let mut bottom_depth = Vec::with_capacity(segment.len());
        for (pings, depth) in runs {
            bottom_depth.par_extend(
                profiles
                    .slice_axis(Axis(0), Slice::from(pings))
                    .axis_iter(Axis(0))
                    .into_par_iter()
                    .map(|profile| self.detect_profile(profile, depth.view()).unwrap_or(f64::NAN)),
            );
        }

        Track::new(
            segment.ping_time.clone(),
            segment.latitude.clone(),
            segment.longitude.clone(),
            bottom_depth,
        )
    }
}
