use std::ops::Range;

use crate::error::{EchoError, Result};

/// Per-ping position and bottom depth, the 1-D counterpart of a segment.
///
/// `bottom_depth` is NaN where the detector found nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub ping_time: Vec<i64>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub bottom_depth: Vec<f64>,
}

impl Track {
    pub fn new(
        ping_time: Vec<i64>,
        latitude: Vec<f64>,
        longitude: Vec<f64>,
        bottom_depth: Vec<f64>,
    ) -> Result<Self> {
        let n = ping_time.len();
        if latitude.len() != n || longitude.len() != n || bottom_depth.len() != n {
            return Err(EchoError::ContractViolation(format!(
                "track columns differ in length: {} / {} / {} / {}",
                n,
                latitude.len(),
                longitude.len(),
                bottom_depth.len()
            )));
        }
        Ok(Self {
            ping_time,
            latitude,
            longitude,
            bottom_depth,
        })
    }

    pub fn len(&self) -> usize {
        self.ping_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ping_time.is_empty()
    }

    pub fn detections(&self) -> usize {
        self.bottom_depth.iter().filter(|d| !d.is_nan()).count()
    }

    pub fn slice(&self, range: Range<usize>) -> Track {
        Track {
            ping_time: self.ping_time[range.clone()].to_vec(),
            latitude: self.latitude[range.clone()].to_vec(),
            longitude: self.longitude[range.clone()].to_vec(),
            bottom_depth: self.bottom_depth[range].to_vec(),
        }
    }

    pub fn split_at(self, at: usize) -> (Track, Track) {
        let at = at.min(self.len());
        (self.slice(0..at), self.slice(at..self.len()))
    }

    pub fn concat(mut self, next: Track) -> Track {
        self.ping_time.extend(next.ping_time);
        self.latitude.extend(next.latitude);
        self.longitude.extend(next.longitude);
        self.bottom_depth.extend(next.bottom_depth);
        self
    }
}
