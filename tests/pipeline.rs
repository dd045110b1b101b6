//! End-to-end run of every stage over a small synthetic deployment

use std::fs;
use std::path::{Path, PathBuf};

use echogrid::calibration::SonarEquation;
use echogrid::config::{BottomConfig, CalibrationParams, DispatchConfig, GridConfig, TrackConfig};
use echogrid::dispatch::{Dispatcher, Stage};
use echogrid::processing::{BottomDetector, Reducer};
use echogrid::raw_file::encode_raw;
use echogrid::segment_file::read_segment;
use echogrid::sink::{self, ParquetSink};
use echogrid::stages::{
    BottomStage, CalibrateStage, ConvertStage, DEFAULT_CONVERT_DIR, DEFAULT_DEPTH_DIR,
    DEFAULT_MVBS_DIR, DEFAULT_SV_DIR, MvbsStage, deployment_groups, export_depths,
};
use echogrid::types::header::RAW_VERSION;
use echogrid::types::{CalibrationReference, Channel, PingDatagram, RawChannel, RawHeader, SegmentKind};
use echogrid::utils::file_utils::find_files;
use echogrid::EchoError;
use itertools::Itertools;
use polars::prelude::DataType;
use tempfile::TempDir;

const S: i64 = 1_000_000_000;
const START: i64 = 1_746_057_600 * S;

const REFERENCE: &str = r#"{
    "soundSpeed": 1490.0,
    "channels": {
        "ES38": {
            "gainDb": 26.5,
            "equivalentBeamAngleDb": -20.6,
            "transmitPowerW": 1000.0,
            "pulseDurationS": 0.001024,
            "absorptionDbPerM": 0.0098,
            "saCorrectionDb": -0.7
        }
    }
}"#;

fn raw_header() -> RawHeader {
    RawHeader::builder()
        .version(RAW_VERSION)
        .channels(vec![
            RawChannel::builder()
                .channel(Channel::builder().id("ES38").frequency_hz(38_000.0).build())
                .sample_interval(0.000256)
                .build(),
        ])
        .build()
}

/// Writes one raw file of `pings` pings, one second apart, starting `offset_s` after START.
fn write_raw(dir: &Path, name: &str, offset_s: i64, pings: i64) -> PathBuf {
    let datagrams: Vec<PingDatagram> = (0..pings)
        .map(|p| {
            PingDatagram::builder()
                .timestamp(START + (offset_s + p) * S)
                .latitude(36.8 + 0.001 * p as f64)
                .longitude(-121.9)
                .channel_index(0)
                .power((0..40).map(|i| -(i as i16) * 64).collect())
                .build()
        })
        .collect();
    let path = dir.join(name);
    fs::write(&path, encode_raw(&raw_header(), &datagrams)).unwrap();
    path
}

struct Deployment {
    _root: TempDir,
    raw: Vec<PathBuf>,
}

fn deployment() -> Deployment {
    let root = tempfile::tempdir().unwrap();
    let raw_dir = root.path().join("raw");
    fs::create_dir_all(&raw_dir).unwrap();
    let raw = vec![
        write_raw(&raw_dir, "250501WF-D20250501-T000000.raw", 0, 8),
        write_raw(&raw_dir, "250501WF-D20250501-T000008.raw", 8, 9),
    ];
    Deployment { _root: root, raw }
}

fn dispatcher(skip_existing: bool) -> Dispatcher {
    Dispatcher::new(
        DispatchConfig::builder()
            .workers(2)
            .threads(1)
            .skip_existing(skip_existing)
            .build(),
    )
    .unwrap()
}

fn convert(raw: &[PathBuf]) -> Vec<PathBuf> {
    let stage = ConvertStage {
        out_dir: PathBuf::from(DEFAULT_CONVERT_DIR),
    };
    let summary = dispatcher(true).run(&stage, raw);
    assert_eq!(summary.succeeded, raw.len());
    raw.iter().map(|p| stage.output_path(p)).collect()
}

fn calibrate(power: &[PathBuf]) -> Vec<PathBuf> {
    let stage = CalibrateStage {
        out_dir: PathBuf::from(DEFAULT_SV_DIR),
        provider: SonarEquation::new(CalibrationReference::from_json(REFERENCE).unwrap()),
        params: CalibrationParams::default(),
    };
    let summary = dispatcher(true).run(&stage, power);
    assert_eq!(summary.failed, 0, "{:?}", summary.failures);
    power.iter().map(|p| stage.output_path(p)).collect()
}

#[test]
fn every_stage_produces_its_product() {
    let deployment = deployment();
    let power = convert(&deployment.raw);
    assert!(power.iter().all(|p| p.exists()));
    assert!(power[0].to_string_lossy().contains("converted"));

    let segment = read_segment(&power[0]).unwrap();
    assert_eq!(segment.kind, SegmentKind::Power);
    assert_eq!(segment.len(), 8);

    let sv = calibrate(&power);
    assert!(sv[0].file_name().unwrap().to_string_lossy().ends_with("_Sv.seg"));
    let calibrated = read_segment(&sv[0]).unwrap();
    assert_eq!(calibrated.kind, SegmentKind::Sv);
    assert!(calibrated.depth.is_some());
    assert_eq!(calibrated.sound_speed, 1490.0);

    // MVBS: one product per deployment, bins straddling the file boundary are merged.
    let mvbs = MvbsStage {
        out_dir: PathBuf::from(DEFAULT_MVBS_DIR),
        grid: GridConfig::builder().ping_bin(5 * S).range_bin(1.0).build(),
        sink: ParquetSink::default(),
    };
    let groups = deployment_groups(&sv);
    assert_eq!(groups.len(), 1);
    let summary = dispatcher(false).run(&mvbs, &groups);
    assert_eq!(summary.succeeded, 1, "{:?}", summary.failures);
    let grid_path = mvbs.output_path(&groups[0]);
    assert!(grid_path.ends_with("MVBS/250501WF_MVBS.parquet"));

    let grid = sink::read_frame(&grid_path).unwrap();
    let times: Vec<i64> = grid
        .column("ping_time")
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    let counts: Vec<u32> = grid
        .column("count")
        .unwrap()
        .as_materialized_series()
        .u32()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(
        times.iter().dedup().copied().collect::<Vec<_>>(),
        vec![START, START + 5 * S, START + 10 * S, START + 15 * S]
    );
    let straddling: u32 = times
        .iter()
        .zip(&counts)
        .filter(|(t, _)| **t == START + 5 * S)
        .map(|(_, c)| c)
        .sum();
    // Pings 5..9 come from both files: 5 pings × 40 samples.
    assert_eq!(straddling, 200);

    // Bottom line with a threshold every sample satisfies: the first sample past the skip.
    let bottom = BottomStage {
        out_dir: PathBuf::from(DEFAULT_DEPTH_DIR),
        detector: BottomDetector::new(
            &BottomConfig::builder()
                .channel("38kHz")
                .threshold_db(1.0e6)
                .skip_from_surface(10)
                .offset_m(0.5)
                .build(),
        )
        .unwrap(),
        sink: ParquetSink::default(),
    };
    let summary = dispatcher(false).run(&bottom, &sv);
    assert_eq!(summary.succeeded, 2, "{:?}", summary.failures);
    let tracks: Vec<PathBuf> = sv.iter().map(|p| bottom.output_path(p)).collect();
    assert!(tracks[0].to_string_lossy().ends_with("T000000_depth.parquet"));
    let track = sink::read_track(&tracks[0]).unwrap();
    assert_eq!(track.len(), 8);
    assert_eq!(track.detections(), 8);
    let expected = calibrated.depth.as_ref().unwrap()[10] + 0.5;
    assert!((track.bottom_depth[0] - expected).abs() < 1e-9);

    // Depth product from the discovered track files.
    let pattern = tracks[0].parent().unwrap().join("*_depth.parquet");
    let inputs = find_files([pattern.to_string_lossy()]).unwrap();
    assert_eq!(inputs, tracks);
    let csv_path = tracks[0].parent().unwrap().join("depths.csv");
    let config = TrackConfig::builder().interval(10 * S).reducer(Reducer::LastValid).build();
    let (rows, summary) = export_depths(&dispatcher(false), &inputs, &config, &csv_path).unwrap();
    assert_eq!(rows, 2);
    assert_eq!(summary.succeeded, 1);

    let text = fs::read_to_string(&csv_path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("ping_time,latitude,longitude,depth,segment"));
    let first = lines.next().unwrap();
    assert!(first.starts_with("2025-05-01T00:00:00Z,36.8"));
    assert!(first.ends_with(",250501WF"));
}

#[test]
fn rerunning_with_skip_existing_writes_nothing() {
    let deployment = deployment();
    let power = convert(&deployment.raw);
    let modified: Vec<_> = power.iter().map(|p| fs::metadata(p).unwrap().modified().unwrap()).collect();

    let stage = ConvertStage {
        out_dir: PathBuf::from(DEFAULT_CONVERT_DIR),
    };
    let again = dispatcher(true).run(&stage, &deployment.raw);
    assert_eq!(again.succeeded, 0);
    assert_eq!(again.already_present, 2);
    assert!(again.ensure_output().is_ok());
    let after: Vec<_> = power.iter().map(|p| fs::metadata(p).unwrap().modified().unwrap()).collect();
    assert_eq!(after, modified);
}

#[test]
fn uncalibratable_channel_is_skipped_not_failed() {
    let deployment = deployment();
    let power = convert(&deployment.raw);
    let stage = CalibrateStage {
        out_dir: PathBuf::from(DEFAULT_SV_DIR),
        provider: SonarEquation::new(CalibrationReference::from_json(r#"{"channels": {}}"#).unwrap()),
        params: CalibrationParams::default(),
    };
    let summary = dispatcher(false).run(&stage, &power);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 0);
    assert!(matches!(summary.ensure_output(), Err(EchoError::EmptyResult(_))));
    assert!(power.iter().all(|p| !stage.output_path(p).exists()));
}

#[test]
fn corrupt_input_fails_only_that_item() {
    let deployment = deployment();
    let broken = deployment.raw[0].with_file_name("250501WF-D20250501-T999999.raw");
    fs::write(&broken, b"not a raw file").unwrap();

    let stage = ConvertStage {
        out_dir: PathBuf::from(DEFAULT_CONVERT_DIR),
    };
    let mut items = deployment.raw.clone();
    items.push(broken.clone());
    let summary = dispatcher(false).run(&stage, &items);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(summary.failures[0].0.contains("T999999"));
    assert!(!stage.output_path(&broken).exists());
}
