use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, warn};
use winnow::Parser;

use crate::error::{EchoError, Result};
use crate::parser::{encode_datagram, parse_datagram, parse_raw_header};
use crate::types::header::{RAW_MAGIC, RAW_VERSION};
use crate::types::{Channel, Ping, PingDatagram, RawHeader, Segment, SegmentKind};
use crate::utils::file_utils::read_binary_file_mmap;

/// A memory-mapped raw datagram file
pub struct RawFile {
    pub path: PathBuf,
    pub header: RawHeader,
    mmap_data: Mmap,
    data_start: usize,
}

impl RawFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mmap_data = read_binary_file_mmap(path)?;
        let mut input: &[u8] = &mmap_data;
        let header = parse_raw_header
            .parse_next(&mut input)
            .map_err(|e| EchoError::format(path, format!("failed to parse header: {e}")))?;
        let data_start = mmap_data.len() - input.len();
        Ok(Self {
            path: path.to_path_buf(),
            header,
            mmap_data,
            data_start,
        })
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.header.channels.iter().map(|c| c.channel.clone()).collect()
    }

    /// Every datagram in file order.
    pub fn datagrams(&self) -> Result<Vec<PingDatagram>> {
        let mut input = &self.mmap_data[self.data_start..];
        let mut datagrams = Vec::new();
        while !input.is_empty() {
            let offset = self.mmap_data.len() - input.len();
            let datagram = parse_datagram(&mut input).map_err(|e| {
                EchoError::format(&self.path, format!("bad datagram at byte {offset}: {e}"))
            })?;
            if datagram.channel_index as usize >= self.header.channels.len() {
                return Err(EchoError::format(
                    &self.path,
                    format!(
                        "datagram at byte {offset} refers to channel {} of {}",
                        datagram.channel_index,
                        self.header.channels.len()
                    ),
                ));
            }
            datagrams.push(datagram);
        }
        Ok(datagrams)
    }

    /// Groups datagrams into pings: consecutive datagrams sharing a timestamp
    /// form one ping, one datagram per channel.
    pub fn pings(&self) -> Result<Vec<Ping>> {
        let channel_count = self.header.channels.len();
        let mut pings: Vec<Ping> = Vec::new();
        let mut seen = vec![false; channel_count];

        for datagram in self.datagrams()? {
            let c = datagram.channel_index as usize;
            let starts_new = match pings.last() {
                Some(ping) => ping.timestamp != datagram.timestamp || seen[c],
                None => true,
            };
            if starts_new {
                seen.iter_mut().for_each(|s| *s = false);
                pings.push(
                    Ping::builder()
                        .timestamp(datagram.timestamp)
                        .latitude(datagram.latitude)
                        .longitude(datagram.longitude)
                        .values(vec![Vec::new(); channel_count])
                        .build(),
                );
            }
            seen[c] = true;
            if let Some(ping) = pings.last_mut() {
                ping.values[c] = datagram.power_db().collect();
            }
        }
        Ok(pings)
    }

    /// Converts the whole file into a power segment. Missing samples are NaN.
    pub fn to_segment(&self) -> Result<Segment> {
        let pings = self.pings()?;
        let intervals: Vec<f32> = self.header.channels.iter().map(|c| c.sample_interval).collect();
        let sample_interval = intervals.first().copied().unwrap_or(0.0) as f64;
        if intervals.iter().any(|&i| (i as f64 - sample_interval).abs() > f64::EPSILON) {
            warn!(path = %self.path.display(), ?intervals, "channels disagree on sample interval, using the first");
        }

        let mut segment = Segment::from_pings(SegmentKind::Power, self.channels(), &pings, None)?;
        segment.sample_interval = sample_interval;
        debug!(path = %self.path.display(), pings = segment.len(), "decoded raw file");
        Ok(segment)
    }
}

/// Serialises a raw file; the inverse of `RawFile::open` + `datagrams`.
pub fn encode_raw(header: &RawHeader, datagrams: &[PingDatagram]) -> Vec<u8> {
    let mut out = RAW_MAGIC.to_vec();
    out.extend(RAW_VERSION.to_le_bytes());
    out.extend((header.channels.len() as u16).to_le_bytes());
    for raw in &header.channels {
        let id = raw.channel.id.as_bytes();
        out.extend((id.len() as u16).to_le_bytes());
        out.extend_from_slice(id);
        out.extend((raw.channel.frequency_hz as f32).to_le_bytes());
        out.extend(raw.sample_interval.to_le_bytes());
    }
    for datagram in datagrams {
        encode_datagram(datagram, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawChannel;
    use crate::types::ping::POWER_COUNT_TO_DB;
    use approx::assert_relative_eq;
    use std::fs;

    fn header() -> RawHeader {
        let channel = |id: &str, f: f64| {
            RawChannel::builder()
                .channel(Channel::builder().id(id).frequency_hz(f).build())
                .sample_interval(0.000256)
                .build()
        };
        RawHeader::builder()
            .version(RAW_VERSION)
            .channels(vec![channel("ES38", 38_000.0), channel("ES200", 200_000.0)])
            .build()
    }

    fn datagram(t: i64, channel: u16, power: Vec<i16>) -> PingDatagram {
        PingDatagram::builder()
            .timestamp(t)
            .latitude(36.0)
            .longitude(-122.0)
            .channel_index(channel)
            .power(power)
            .build()
    }

    #[test]
    fn groups_datagrams_into_pings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("D1-T1.raw");
        let datagrams = vec![
            datagram(100, 0, vec![256, 512, 768]),
            datagram(100, 1, vec![256]),
            datagram(200, 0, vec![0, 0, 0]),
        ];
        fs::write(&path, encode_raw(&header(), &datagrams)).unwrap();

        let segment = RawFile::open(&path).unwrap().to_segment().unwrap();
        assert_eq!(segment.kind, SegmentKind::Power);
        assert_eq!(segment.ping_time, vec![100, 200]);
        assert_eq!(segment.values.dim(), (2, 2, 3));
        assert_relative_eq!(segment.values[[0, 0, 1]], 512.0 * POWER_COUNT_TO_DB);
        assert!(segment.values[[0, 1, 1]].is_nan());
        assert!(segment.values[[1, 1, 0]].is_nan());
        assert_relative_eq!(segment.sample_interval, 0.000256, epsilon = 1e-9);
    }

    #[test]
    fn bad_channel_index_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.raw");
        fs::write(&path, encode_raw(&header(), &[datagram(1, 5, vec![1])])).unwrap();
        let err = RawFile::open(&path).unwrap().to_segment().unwrap_err();
        assert!(matches!(err, EchoError::Format { .. }));
    }

    #[test]
    fn truncated_datagram_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        let mut bytes = encode_raw(&header(), &[datagram(1, 0, vec![1, 2])]);
        bytes.pop();
        fs::write(&path, bytes).unwrap();
        assert!(matches!(RawFile::open(&path).unwrap().datagrams(), Err(EchoError::Format { .. })));
    }
}
