use bon::Builder;
use serde::{Deserialize, Serialize};

/// One transducer channel.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Channel {
    #[builder(into)]
    pub id: String,
    pub frequency_hz: f64,
}

impl Channel {
    pub fn frequency_khz(&self) -> f64 {
        self.frequency_hz / 1000.0
    }
}
