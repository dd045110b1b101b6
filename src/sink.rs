//! Durable outputs: Parquet tables, segment containers and the depth CSV
//!
//! Every write lands in a temporary file next to its destination and is
//! renamed into place once complete, so an aborted run never leaves a
//! partially written output behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use bon::Builder;
use polars::prelude::*;
use polars_io::prelude::ParquetWriter;
use tracing::debug;

use crate::error::{EchoError, Result};
use crate::segment_file::encode_segment;
use crate::types::{AggregatedBin, Segment, Track, TrackBin};
use crate::utils::misc::format_timestamp;

pub const DEFAULT_ROW_GROUP_SIZE: usize = 64 * 1024;

/// Whether a completed output exists at `path`.
pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Write through a temporary file in the destination directory, then rename.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".echogrid-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    write(temp.as_file_mut())?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path)?;
    debug!(path = %path.display(), "wrote output");
    Ok(())
}

/// Parquet writer for gridded and track outputs.
#[derive(Debug, Clone, Builder)]
pub struct ParquetSink {
    #[builder(default = DEFAULT_ROW_GROUP_SIZE)]
    pub row_group_size: usize,
}

impl Default for ParquetSink {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ParquetSink {
    /// Overwrites `path` with `frame`.
    pub fn write_frame(&self, path: &Path, frame: &mut DataFrame) -> Result<()> {
        write_atomic(path, |file| {
            ParquetWriter::new(file)
                .with_row_group_size(Some(self.row_group_size))
                .finish(frame)?;
            Ok(())
        })
    }

    pub fn write_bins(&self, path: &Path, bins: &[AggregatedBin]) -> Result<()> {
        let mut frame = bins_frame(bins)?;
        self.write_frame(path, &mut frame)
    }

    pub fn write_track(&self, path: &Path, track: &Track) -> Result<()> {
        let mut frame = track_frame(track)?;
        self.write_frame(path, &mut frame)
    }
}

fn datetime_column(name: &str, times: &[i64]) -> Result<Column> {
    let series = Series::new(name.into(), times)
        .cast(&DataType::Datetime(TimeUnit::Nanoseconds, None))?;
    Ok(series.into())
}

/// One row per cell: `ping_time`, `channel`, `depth`, `Sv`, `count`.
pub fn bins_frame(bins: &[AggregatedBin]) -> Result<DataFrame> {
    let times: Vec<i64> = bins.iter().map(|b| b.ping_time).collect();
    let channels: Vec<&str> = bins.iter().map(|b| b.channel.as_str()).collect();
    let depths: Vec<f64> = bins.iter().map(|b| b.depth).collect();
    let values: Vec<f64> = bins.iter().map(|b| b.value).collect();
    let counts: Vec<u32> = bins.iter().map(|b| b.count).collect();

    Ok(DataFrame::new(vec![
        datetime_column("ping_time", &times)?,
        Series::new("channel".into(), &channels).into(),
        Series::new("depth".into(), &depths).into(),
        Series::new("Sv".into(), &values).into(),
        Series::new("count".into(), &counts).into(),
    ])?)
}

pub fn track_frame(track: &Track) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        datetime_column("ping_time", &track.ping_time)?,
        Series::new("latitude".into(), &track.latitude).into(),
        Series::new("longitude".into(), &track.longitude).into(),
        Series::new("bottom_depth".into(), &track.bottom_depth).into(),
    ])?)
}

pub fn read_frame(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EchoError::NotFound(path.to_path_buf()),
        _ => EchoError::Io(e),
    })?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| EchoError::format(path, e.to_string()))
}

fn f64_column(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = frame.column(name)?.as_materialized_series().f64()?;
    Ok(column.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn time_column(frame: &DataFrame, name: &str) -> Result<Vec<i64>> {
    let column = frame
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    let values = column.i64()?;
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| {
                EchoError::ContractViolation(format!("row {i} of '{name}' has no timestamp"))
            })
        })
        .collect()
}

/// Reads a depth track written by [`ParquetSink::write_track`].
pub fn read_track(path: &Path) -> Result<Track> {
    let frame = read_frame(path)?;
    let read = || -> Result<Track> {
        Track::new(
            time_column(&frame, "ping_time")?,
            f64_column(&frame, "latitude")?,
            f64_column(&frame, "longitude")?,
            f64_column(&frame, "bottom_depth")?,
        )
    };
    read().map_err(|e| match e {
        EchoError::Polars(err) => EchoError::format(path, err.to_string()),
        other => other,
    })
}

/// Writes a segment container.
pub fn write_segment(path: &Path, segment: &Segment) -> Result<()> {
    let bytes = encode_segment(segment)?;
    write_atomic(path, |file| {
        file.write_all(&bytes)?;
        Ok(())
    })
}

/// One row of the depth product.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthRow {
    pub deployment: String,
    pub bin: TrackBin,
}

/// Writes the depth product CSV, omitting rows with any NaN field.
/// Returns the number of rows written.
pub fn write_depth_csv(path: &Path, rows: &[DepthRow]) -> Result<usize> {
    let mut written = 0;
    write_atomic(path, |file| {
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(["ping_time", "latitude", "longitude", "depth", "segment"])?;
        for row in rows.iter().filter(|r| r.bin.is_complete()) {
            writer.write_record([
                format_timestamp(row.bin.ping_time),
                format!("{:.3}", row.bin.latitude),
                format!("{:.3}", row.bin.longitude),
                format!("{:.1}", row.bin.depth),
                row.deployment.clone(),
            ])?;
            written += 1;
        }
        writer.flush()?;
        Ok(())
    })?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        Track::new(
            vec![0, 1_000_000_000],
            vec![36.5, 36.6],
            vec![-122.0, -122.1],
            vec![12.5, f64::NAN],
        )
        .unwrap()
    }

    #[test]
    fn track_survives_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/A-1_depth.parquet");
        ParquetSink::default().write_track(&path, &track()).unwrap();
        assert!(exists(&path));

        let read = read_track(&path).unwrap();
        assert_eq!(read.ping_time, vec![0, 1_000_000_000]);
        assert_eq!(read.bottom_depth[0], 12.5);
        assert!(read.bottom_depth[1].is_nan());
    }

    #[test]
    fn bins_frame_has_expected_schema() {
        let bins = vec![AggregatedBin {
            ping_time: 5,
            channel: "ES38".to_string(),
            range_bin: 2,
            depth: 2.5,
            value: -60.0,
            count: 4,
        }];
        let frame = bins_frame(&bins).unwrap();
        let names: Vec<&str> = frame.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["ping_time", "channel", "depth", "Sv", "count"]);
        assert!(matches!(
            frame.column("ping_time").unwrap().dtype(),
            DataType::Datetime(TimeUnit::Nanoseconds, _)
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.parquet");
        ParquetSink::default().write_bins(&path, &bins).unwrap();
        assert!(read_frame(&path).unwrap().equals(&frame));
    }

    #[test]
    fn unreadable_parquet_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A-1_depth.parquet");
        fs::write(&path, b"PAR0 not really").unwrap();
        match read_track(&path) {
            Err(EchoError::Format { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a format error, got {other:?}"),
        }
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let result = write_atomic(&path, |file| {
            file.write_all(b"partial")?;
            Err(EchoError::EmptyResult("aborted".to_string()))
        });
        assert!(result.is_err());
        assert!(!exists(&path));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn depth_csv_omits_incomplete_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depths.csv");
        let bin = |t: i64, depth: f64| TrackBin {
            ping_time: t,
            latitude: 36.12345,
            longitude: -121.98765,
            depth,
            count: 1,
        };
        let rows = vec![
            DepthRow { deployment: "250501WF".into(), bin: bin(1_746_123_130_000_000_000, 101.26) },
            DepthRow { deployment: "250501WF".into(), bin: bin(1_746_123_190_000_000_000, f64::NAN) },
        ];
        assert_eq!(write_depth_csv(&path, &rows).unwrap(), 1);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "ping_time,latitude,longitude,depth,segment\n2025-05-01T18:12:10Z,36.123,-121.988,101.3,250501WF\n"
        );
    }
}
