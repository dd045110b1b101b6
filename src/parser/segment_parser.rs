use winnow::{
    Parser,
    binary::{le_f64, le_i64},
    combinator::repeat,
    error::{ContextError, StrContext},
    token::take,
};

use crate::parser::header_parser::parse_channel_id;
use crate::types::channel::Channel;
use crate::types::header::SegmentHeader;

/// Column buffers of a segment's ping block, values flattened as `(ping, channel, sample)`.
#[derive(Debug, Default, PartialEq)]
pub struct PingTable {
    pub ping_time: Vec<i64>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub values: Vec<f64>,
}

/// Segment channel record: id followed by an f64 frequency (Hz).
pub fn parse_segment_channel(input: &mut &[u8]) -> Result<Channel, ContextError> {
    let id = parse_channel_id(input)?;
    let frequency_hz = le_f64.parse_next(input)?;
    Ok(Channel::builder().id(id).frequency_hz(frequency_hz).build())
}

pub fn parse_channel_table(
    input: &mut &[u8],
    header: &SegmentHeader,
) -> Result<Vec<Channel>, ContextError> {
    repeat(header.channel_count as usize, parse_segment_channel)
        .context(StrContext::Label("channel table"))
        .parse_next(input)
}

/// Reads `count` little-endian f64 values in one slice.
pub fn parse_f64_block(input: &mut &[u8], count: usize) -> Result<Vec<f64>, ContextError> {
    let bytes = take(count * 8).parse_next(input)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect())
}

/// Parses `header.ping_count` ping records into column buffers.
///
/// Each record is an i64 timestamp (ns), f64 latitude, f64 longitude and
/// `channel_count * sample_count` f64 values, channel-major.
pub fn parse_pings(input: &mut &[u8], header: &SegmentHeader) -> Result<PingTable, ContextError> {
    let pings = header.ping_count as usize;
    let per_ping = header.values_per_ping();
    let mut table = PingTable {
        ping_time: Vec::with_capacity(pings),
        latitude: Vec::with_capacity(pings),
        longitude: Vec::with_capacity(pings),
        values: Vec::with_capacity(pings * per_ping),
    };

    for _ in 0..pings {
        let timestamp = le_i64.parse_next(input)?;
        let latitude = le_f64.parse_next(input)?;
        let longitude = le_f64.parse_next(input)?;
        let values = parse_f64_block(input, per_ping)?;

        table.ping_time.push(timestamp);
        table.latitude.push(latitude);
        table.longitude.push(longitude);
        table.values.extend(values);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::header::SegmentKind;

    #[test]
    fn parses_ping_block() {
        let header = SegmentHeader::builder()
            .kind(SegmentKind::Power)
            .channel_count(1)
            .ping_count(2)
            .sample_count(2)
            .sample_interval(0.001)
            .sound_speed(1500.0)
            .build();
        let mut bytes = Vec::new();
        for (t, v) in [(10i64, 1.0f64), (20, 2.0)] {
            bytes.extend(t.to_le_bytes());
            bytes.extend(36.5f64.to_le_bytes());
            bytes.extend((-122.0f64).to_le_bytes());
            bytes.extend(v.to_le_bytes());
            bytes.extend((v * 10.0).to_le_bytes());
        }
        let mut input = bytes.as_slice();
        let table = parse_pings(&mut input, &header).unwrap();
        assert!(input.is_empty());
        assert_eq!(table.ping_time, vec![10, 20]);
        assert_eq!(table.values, vec![1.0, 10.0, 2.0, 20.0]);
    }

    #[test]
    fn short_block_fails() {
        let bytes = 1.0f64.to_le_bytes();
        let mut input = &bytes[..];
        assert!(parse_f64_block(&mut input, 2).is_err());
    }
}
