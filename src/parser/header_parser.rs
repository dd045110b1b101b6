use winnow::{
    Parser,
    binary::{le_f32, le_f64, le_u8, le_u16, le_u32},
    combinator::repeat,
    error::{ContextError, StrContext},
    token::{literal, take},
};

use crate::types::channel::Channel;
use crate::types::header::{
    RAW_MAGIC, RAW_VERSION, RawChannel, RawHeader, SEGMENT_MAGIC, SEGMENT_VERSION, SegmentHeader,
    SegmentKind,
};

/// Parses the fixed part of a segment container.
///
/// Layout (little-endian):
/// - 8 bytes magic `ECHOSEG\0`
/// - u16 version, u8 kind, u8 flags, u16 channel count
/// - u32 ping count, u32 sample count
/// - f64 sample interval (s), f64 sound speed (m/s)
pub fn parse_segment_header(input: &mut &[u8]) -> Result<SegmentHeader, ContextError> {
    literal(SEGMENT_MAGIC)
        .context(StrContext::Label("segment magic"))
        .parse_next(input)?;
    let version = le_u16
        .verify(|v: &u16| *v == SEGMENT_VERSION)
        .context(StrContext::Label("segment version"))
        .parse_next(input)?;
    let kind = le_u8
        .verify_map(SegmentKind::from_u8)
        .context(StrContext::Label("segment kind"))
        .parse_next(input)?;
    let flags = le_u8.parse_next(input)?;
    let channel_count = le_u16.parse_next(input)?;
    let ping_count = le_u32.parse_next(input)?;
    let sample_count = le_u32.parse_next(input)?;
    let sample_interval = le_f64.parse_next(input)?;
    let sound_speed = le_f64.parse_next(input)?;

    let header = SegmentHeader::builder()
        .version(version)
        .kind(kind)
        .flags(flags)
        .channel_count(channel_count)
        .ping_count(ping_count)
        .sample_count(sample_count)
        .sample_interval(sample_interval)
        .sound_speed(sound_speed)
        .build();
    Ok(header)
}

/// Length-prefixed (u16) UTF-8 channel identifier.
pub fn parse_channel_id(input: &mut &[u8]) -> Result<String, ContextError> {
    let len = le_u16.parse_next(input)?;
    let bytes = take(len as usize)
        .context(StrContext::Label("channel id"))
        .parse_next(input)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Channel record of a raw file: id, f32 frequency (Hz), f32 sample interval (s).
pub fn parse_raw_channel(input: &mut &[u8]) -> Result<RawChannel, ContextError> {
    let id = parse_channel_id(input)?;
    let frequency_hz = le_f32.parse_next(input)?;
    let sample_interval = le_f32.parse_next(input)?;

    Ok(RawChannel::builder()
        .channel(Channel::builder().id(id).frequency_hz(frequency_hz as f64).build())
        .sample_interval(sample_interval)
        .build())
}

/// Parses the raw file preamble: magic, version and the channel table.
pub fn parse_raw_header(input: &mut &[u8]) -> Result<RawHeader, ContextError> {
    literal(RAW_MAGIC)
        .context(StrContext::Label("raw magic"))
        .parse_next(input)?;
    let version = le_u16
        .verify(|v: &u16| *v == RAW_VERSION)
        .context(StrContext::Label("raw version"))
        .parse_next(input)?;
    let channel_count = le_u16.parse_next(input)?;
    let channels: Vec<RawChannel> = repeat(channel_count as usize, parse_raw_channel)
        .context(StrContext::Label("channel table"))
        .parse_next(input)?;

    Ok(RawHeader::builder()
        .version(version)
        .channels(channels)
        .build())
}
