//! Calibration Provider: received power to volume backscattering strength

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Array3, Zip};
use tracing::debug;

use crate::config::{CalibrationParams, EncodeMode, WaveformMode};
use crate::error::{EchoError, Result};
use crate::types::{CalibrationReference, ChannelCalibration, Segment, SegmentKind};

/// Smallest range (metres) used in the range-dependent terms, keeping
/// `log10(r)` finite at the transducer face.
pub const MIN_RANGE_M: f64 = 1e-3;

/// Outcome of calibrating one segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    Calibrated(Segment),
    /// The segment cannot be calibrated and should be skipped, not failed.
    Skip(String),
}

pub trait CalibrationProvider: Sync {
    fn calibrate(&self, segment: &Segment, params: &CalibrationParams) -> Result<Calibration>;
}

/// Narrowband (CW) sonar equation driven by a reference document.
///
/// `Sv = Pr + 20 log10(r) + 2αr − 10 log10(Pt λ² c τ ψ / 32π²) − 2G − 2Sa`
#[derive(Debug, Clone)]
pub struct SonarEquation {
    reference: CalibrationReference,
}

impl SonarEquation {
    pub fn new(reference: CalibrationReference) -> Self {
        Self { reference }
    }

    /// Constant (range-independent) part of the equation for one channel.
    fn channel_constant(cal: &ChannelCalibration, frequency_hz: f64, sound_speed: f64) -> f64 {
        let wavelength = sound_speed / frequency_hz;
        let psi = 10f64.powf(cal.equivalent_beam_angle_db / 10.0);
        let transmit = cal.transmit_power_w * wavelength.powi(2) * sound_speed * cal.pulse_duration_s * psi
            / (32.0 * PI * PI);
        10.0 * transmit.log10() + 2.0 * cal.gain_db + 2.0 * cal.sa_correction_db
    }
}

impl CalibrationProvider for SonarEquation {
    fn calibrate(&self, segment: &Segment, params: &CalibrationParams) -> Result<Calibration> {
        if params.encode_mode != EncodeMode::Power || params.waveform_mode != WaveformMode::Cw {
            return Err(EchoError::Config(format!(
                "only power-encoded CW data can be calibrated, got {:?}/{:?}",
                params.encode_mode, params.waveform_mode
            )));
        }
        if segment.kind != SegmentKind::Power {
            return Err(EchoError::ContractViolation(
                "segment is already calibrated".to_string(),
            ));
        }
        if !(segment.sample_interval > 0.0) {
            return Err(EchoError::ContractViolation(format!(
                "segment sample interval {} s cannot yield a range",
                segment.sample_interval
            )));
        }

        let mut calibrations = Vec::with_capacity(segment.channel_count());
        for channel in &segment.channels {
            match self.reference.channel(&channel.id) {
                Some(cal) => calibrations.push(cal),
                None => {
                    return Ok(Calibration::Skip(format!(
                        "missing calibration reference for channel '{}'",
                        channel.id
                    )));
                }
            }
        }

        let sound_speed = self.reference.sound_speed.unwrap_or(segment.sound_speed);
        let samples = segment.sample_count();
        let range = Array1::from_shape_fn(samples, |i| sound_speed * segment.sample_interval * i as f64 / 2.0);
        let depth = range.mapv(|r| r + params.depth_offset);

        // Range-dependent gain plus channel constant, per (channel, sample).
        let correction = Array2::from_shape_fn((segment.channel_count(), samples), |(c, i)| {
            let cal = calibrations[c];
            let r = range[i].max(MIN_RANGE_M);
            20.0 * r.log10() + 2.0 * cal.absorption_db_per_m * r
                - Self::channel_constant(cal, segment.channels[c].frequency_hz, sound_speed)
        });

        let mut sv = Array3::<f64>::zeros(segment.values.dim());
        Zip::indexed(&mut sv)
            .and(&segment.values)
            .par_for_each(|(_, c, i), out, &power| *out = power + correction[[c, i]]);

        debug!(pings = segment.len(), channels = segment.channel_count(), sound_speed, "calibrated segment");
        let mut calibrated = segment.with_values(SegmentKind::Sv, sv, Some(depth))?;
        calibrated.sound_speed = sound_speed;
        Ok(Calibration::Calibrated(calibrated))
    }
}
