//! Calibration reference document (JSON) consumed by the sonar-equation provider

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EchoError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationReference {
    /// Overrides the sound speed recorded in the segment when present.
    #[serde(rename = "soundSpeed")]
    pub sound_speed: Option<f64>,
    pub channels: HashMap<String, ChannelCalibration>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelCalibration {
    #[serde(rename = "gainDb")]
    pub gain_db: f64,
    #[serde(rename = "saCorrectionDb", default)]
    pub sa_correction_db: f64,
    #[serde(rename = "equivalentBeamAngleDb")]
    pub equivalent_beam_angle_db: f64,
    #[serde(rename = "transmitPowerW")]
    pub transmit_power_w: f64,
    #[serde(rename = "pulseDurationS")]
    pub pulse_duration_s: f64,
    #[serde(rename = "absorptionDbPerM", default)]
    pub absorption_db_per_m: f64,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CalibrationReference {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EchoError::NotFound(path.to_path_buf()),
            _ => EchoError::Io(e),
        })?;
        Self::from_json(&text)
    }

    pub fn channel(&self, id: &str) -> Option<&ChannelCalibration> {
        self.channels.get(id)
    }
}
