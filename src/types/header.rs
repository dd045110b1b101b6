use bon::Builder;

use crate::types::channel::Channel;

pub const SEGMENT_MAGIC: &[u8] = b"ECHOSEG\0";
pub const SEGMENT_VERSION: u16 = 1;
pub const RAW_MAGIC: &[u8] = b"ECHORAW\0";
pub const RAW_VERSION: u16 = 1;

/// Bit 0 of the segment flags byte: a range coordinate block follows the channel table.
pub const FLAG_HAS_RANGE: u8 = 0b0000_0001;

/// What the values of a segment represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Received power in dB, straight from conversion.
    Power,
    /// Calibrated volume backscattering strength in dB.
    Sv,
}

impl SegmentKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SegmentKind::Power),
            1 => Some(SegmentKind::Sv),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SegmentKind::Power => 0,
            SegmentKind::Sv => 1,
        }
    }
}

/// Fixed-size header of a segment container file.
#[derive(Debug, PartialEq, Builder)]
pub struct SegmentHeader {
    #[builder(default = SEGMENT_VERSION)]
    pub version: u16,
    pub kind: SegmentKind,
    #[builder(default)]
    pub flags: u8,
    pub channel_count: u16,
    pub ping_count: u32,
    pub sample_count: u32,
    pub sample_interval: f64,
    pub sound_speed: f64,
}

impl SegmentHeader {
    pub fn has_range(&self) -> bool {
        self.flags & FLAG_HAS_RANGE != 0
    }

    /// Number of f64 values stored per ping.
    pub fn values_per_ping(&self) -> usize {
        self.channel_count as usize * self.sample_count as usize
    }
}

/// Header of a raw datagram file: the channel table that datagrams index into.
#[derive(Debug, PartialEq, Builder)]
pub struct RawHeader {
    pub version: u16,
    pub channels: Vec<RawChannel>,
}

/// Channel record as the instrument writes it.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct RawChannel {
    pub channel: Channel,
    /// Seconds between successive range samples.
    pub sample_interval: f32,
}
