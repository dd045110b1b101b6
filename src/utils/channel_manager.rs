use crate::error::{EchoError, Result};
use crate::types::Channel;

/// Relative tolerance used when matching a channel by nominal frequency.
const FREQUENCY_TOLERANCE: f64 = 1e-3;

/// Lookup of transducer channels by identifier or frequency.
#[derive(Debug, Clone)]
pub struct ChannelManager {
    channels: Vec<Channel>,
}

impl ChannelManager {
    pub fn new(channels: &[Channel]) -> Self {
        Self {
            channels: channels.to_vec(),
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Index of the channel whose identifier matches exactly.
    pub fn find_by_id(&self, id: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.id == id)
    }

    /// Index of the channel whose nominal frequency matches `frequency_hz`.
    pub fn find_by_frequency(&self, frequency_hz: f64) -> Option<usize> {
        self.channels.iter().position(|c| {
            (c.frequency_hz - frequency_hz).abs() <= FREQUENCY_TOLERANCE * frequency_hz.abs().max(1.0)
        })
    }

    /// Resolves a user-supplied selector: an identifier, or a frequency such
    /// as `38000`, `38kHz` or `38 khz`.
    pub fn resolve(&self, selector: &str) -> Result<usize> {
        if let Some(index) = self.find_by_id(selector) {
            return Ok(index);
        }
        parse_frequency(selector)
            .and_then(|hz| self.find_by_frequency(hz))
            .ok_or_else(|| {
                let known: Vec<&str> = self.channels.iter().map(|c| c.id.as_str()).collect();
                EchoError::Config(format!(
                    "channel '{selector}' not present; available channels: {known:?}"
                ))
            })
    }
}

fn parse_frequency(selector: &str) -> Option<f64> {
    let lowered = selector.trim().to_ascii_lowercase();
    let (number, scale) = if let Some(n) = lowered.strip_suffix("khz") {
        (n, 1_000.0)
    } else if let Some(n) = lowered.strip_suffix("hz") {
        (n, 1.0)
    } else {
        (lowered.as_str(), 1.0)
    };
    number.trim().parse::<f64>().ok().map(|v| v * scale)
}
