use winnow::{
    Parser,
    binary::{le_f64, le_i64, le_u16, le_u32},
    error::{ContextError, StrContext},
    token::{literal, take},
};

use crate::types::ping::PingDatagram;

pub const PING_TAG: &[u8] = b"PNG0";

/// Parses a single ping datagram:
/// - 4 bytes tag `PNG0`
/// - i64 timestamp (ns since epoch), f64 latitude, f64 longitude
/// - u16 channel index, u32 sample count
/// - `sample count` little-endian i16 power counts
pub fn parse_datagram(input: &mut &[u8]) -> Result<PingDatagram, ContextError> {
    literal(PING_TAG)
        .context(StrContext::Label("datagram tag"))
        .parse_next(input)?;
    let timestamp = le_i64.parse_next(input)?;
    let latitude = le_f64.parse_next(input)?;
    let longitude = le_f64.parse_next(input)?;
    let channel_index = le_u16.parse_next(input)?;
    let sample_count = le_u32.parse_next(input)?;
    let bytes = take(sample_count as usize * 2)
        .context(StrContext::Label("power samples"))
        .parse_next(input)?;
    let power = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(PingDatagram::builder()
        .timestamp(timestamp)
        .latitude(latitude)
        .longitude(longitude)
        .channel_index(channel_index)
        .power(power)
        .build())
}

/// Encodes a datagram in the layout `parse_datagram` reads.
pub fn encode_datagram(datagram: &PingDatagram, out: &mut Vec<u8>) {
    out.extend_from_slice(PING_TAG);
    out.extend(datagram.timestamp.to_le_bytes());
    out.extend(datagram.latitude.to_le_bytes());
    out.extend(datagram.longitude.to_le_bytes());
    out.extend(datagram.channel_index.to_le_bytes());
    out.extend((datagram.power.len() as u32).to_le_bytes());
    for count in &datagram.power {
        out.extend(count.to_le_bytes());
    }
}
