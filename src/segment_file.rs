use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::{Array1, Array3};
use tracing::debug;
use winnow::Parser;

use crate::error::{EchoError, Result};
use crate::parser::{parse_channel_table, parse_f64_block, parse_pings, parse_segment_header};
use crate::types::header::{FLAG_HAS_RANGE, SEGMENT_MAGIC, SEGMENT_VERSION};
use crate::types::{Channel, Segment, SegmentHeader};
use crate::utils::file_utils::read_binary_file_mmap;
use crate::utils::misc::format_timestamp;

/// A memory-mapped segment container with its header and channel table parsed
pub struct SegmentFile {
    pub path: PathBuf,
    pub header: SegmentHeader,
    pub channels: Vec<Channel>,
    pub depth: Option<Array1<f64>>,
    mmap_data: Mmap,
    /// Offset of the first ping record
    data_start: usize,
}

impl SegmentFile {
    /// Open a segment container and parse everything up to the ping block
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mmap_data = read_binary_file_mmap(path)?;
        let format_error = |what: &str, e: winnow::error::ContextError| {
            EchoError::format(path, format!("failed to parse {what}: {e}"))
        };

        let mut input: &[u8] = &mmap_data;
        let header = parse_segment_header
            .parse_next(&mut input)
            .map_err(|e| format_error("header", e))?;
        let channels =
            parse_channel_table(&mut input, &header).map_err(|e| format_error("channel table", e))?;
        let depth = if header.has_range() {
            let block = parse_f64_block(&mut input, header.sample_count as usize)
                .map_err(|e| format_error("range coordinate", e))?;
            Some(Array1::from(block))
        } else {
            None
        };
        let data_start = mmap_data.len() - input.len();

        let expected = (header.ping_count as usize)
            .checked_mul(24 + 8 * header.values_per_ping())
            .ok_or_else(|| EchoError::format(path, "ping block size overflows"))?;
        if input.len() != expected {
            return Err(EchoError::format(
                path,
                format!(
                    "ping block holds {} bytes, header describes {} pings needing {}",
                    input.len(),
                    header.ping_count,
                    expected
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            header,
            channels,
            depth,
            mmap_data,
            data_start,
        })
    }

    /// Parse the ping block into an in-memory segment
    pub fn segment(&self) -> Result<Segment> {
        let mut input = &self.mmap_data[self.data_start..];
        let table = parse_pings(&mut input, &self.header)
            .map_err(|e| EchoError::format(&self.path, format!("failed to parse pings: {e}")))?;
        if !input.is_empty() {
            return Err(EchoError::format(&self.path, "trailing bytes after ping block"));
        }

        let shape = (
            self.header.ping_count as usize,
            self.header.channel_count as usize,
            self.header.sample_count as usize,
        );
        let values = Array3::from_shape_vec(shape, table.values)?;
        let segment = Segment::builder()
            .kind(self.header.kind)
            .channels(self.channels.clone())
            .ping_time(table.ping_time)
            .latitude(table.latitude)
            .longitude(table.longitude)
            .values(values)
            .maybe_depth(self.depth.clone())
            .sample_interval(self.header.sample_interval)
            .sound_speed(self.header.sound_speed)
            .build()
            .map_err(|e| EchoError::format(&self.path, e.to_string()))?;

        debug!(
            path = %self.path.display(),
            pings = segment.len(),
            channels = segment.channel_count(),
            samples = segment.sample_count(),
            "read segment"
        );
        Ok(segment)
    }

    /// Get a summary of the file contents
    pub fn get_summary(&self) -> String {
        let mut result = String::new();
        result.push_str(&format!("Segment {}:\n", self.path.display()));
        result.push_str(&format!("  Kind: {:?}\n", self.header.kind));
        result.push_str(&format!(
            "  Pings: {}, samples per channel: {}\n",
            self.header.ping_count, self.header.sample_count
        ));
        for channel in &self.channels {
            result.push_str(&format!(
                "  Channel {} ({} kHz)\n",
                channel.id,
                channel.frequency_khz()
            ));
        }
        if let Some(depth) = &self.depth {
            if let (Some(first), Some(last)) = (depth.first(), depth.last()) {
                result.push_str(&format!("  Range: {first:.2} m to {last:.2} m\n"));
            }
        }
        if let Some(bytes) = self.mmap_data.get(self.data_start..self.data_start + 8) {
            let mut word = [0u8; 8];
            word.copy_from_slice(bytes);
            let start = i64::from_le_bytes(word);
            result.push_str(&format!("  Starts: {}\n", format_timestamp(start)));
        }
        result
    }
}

/// Segment Reader: load one file's pings.
pub fn read_segment(path: impl AsRef<Path>) -> Result<Segment> {
    let file = SegmentFile::open(path)?;
    debug!("{}", file.get_summary());
    file.segment()
}

/// Serialises a segment into the container layout `SegmentFile` reads.
pub fn encode_segment(segment: &Segment) -> Result<Vec<u8>> {
    if !segment.range_changes.is_empty() {
        return Err(EchoError::ContractViolation(
            "segment spans several range coordinates; a container holds one".to_string(),
        ));
    }
    let too_large = |what: &str| EchoError::ContractViolation(format!("segment has too many {what}"));
    let channel_count = u16::try_from(segment.channel_count()).map_err(|_| too_large("channels"))?;
    let ping_count = u32::try_from(segment.len()).map_err(|_| too_large("pings"))?;
    let sample_count = u32::try_from(segment.sample_count()).map_err(|_| too_large("samples"))?;

    let mut out = Vec::with_capacity(64 + segment.values.len() * 8 + segment.len() * 24);
    out.extend_from_slice(SEGMENT_MAGIC);
    out.extend(SEGMENT_VERSION.to_le_bytes());
    out.push(segment.kind.as_u8());
    out.push(if segment.depth.is_some() { FLAG_HAS_RANGE } else { 0 });
    out.extend(channel_count.to_le_bytes());
    out.extend(ping_count.to_le_bytes());
    out.extend(sample_count.to_le_bytes());
    out.extend(segment.sample_interval.to_le_bytes());
    out.extend(segment.sound_speed.to_le_bytes());

    for channel in &segment.channels {
        let id = channel.id.as_bytes();
        let len = u16::try_from(id.len()).map_err(|_| too_large("bytes in a channel id"))?;
        out.extend(len.to_le_bytes());
        out.extend_from_slice(id);
        out.extend(channel.frequency_hz.to_le_bytes());
    }
    if let Some(depth) = &segment.depth {
        for d in depth {
            out.extend(d.to_le_bytes());
        }
    }
    for (p, ping) in segment.values.outer_iter().enumerate() {
        out.extend(segment.ping_time[p].to_le_bytes());
        out.extend(segment.latitude[p].to_le_bytes());
        out.extend(segment.longitude[p].to_le_bytes());
        for v in ping.iter() {
            out.extend(v.to_le_bytes());
        }
    }
    Ok(out)
}
