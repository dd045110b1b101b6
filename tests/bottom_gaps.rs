//! Pings without a bottom detection, from Sv segment to depth product

use std::fs;

use approx::assert_relative_eq;
use echogrid::config::{BottomConfig, DispatchConfig, TrackConfig};
use echogrid::dispatch::Dispatcher;
use echogrid::processing::{BottomDetector, Reducer, resample_tracks};
use echogrid::sink::ParquetSink;
use echogrid::stages::export_depths;
use echogrid::types::{Channel, Segment, SegmentKind};
use ndarray::{Array3, array};
use rstest::rstest;

const S: i64 = 1_000_000_000;

/// Six pings one second apart; only pings 1 and 4 cross the threshold.
fn sv_segment() -> Segment {
    let mut values = Array3::from_elem((6, 1, 4), -10.0);
    values[[1, 0, 2]] = -60.0;
    values[[4, 0, 3]] = -60.0;
    Segment::builder()
        .kind(SegmentKind::Sv)
        .channels(vec![Channel::builder().id("ES38").frequency_hz(38_000.0).build()])
        .ping_time((0..6).map(|s| s * S).collect())
        .latitude(vec![36.0; 6])
        .longitude(vec![-122.0; 6])
        .values(values)
        .depth(array![0.0, 5.0, 10.0, 15.0])
        .build()
        .unwrap()
}

fn detector() -> BottomDetector {
    BottomDetector::new(&BottomConfig::builder().skip_from_surface(0).offset_m(0.5).build()).unwrap()
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(DispatchConfig::builder().workers(2).threads(1).build()).unwrap()
}

fn interpolating() -> TrackConfig {
    TrackConfig::builder().interval(S).reducer(Reducer::Interpolate).build()
}

#[test]
fn undetected_pings_are_nan() {
    let track = detector().detect(&sv_segment()).unwrap();
    assert_eq!(track.detections(), 2);
    assert!(track.bottom_depth[0].is_nan());
    assert_relative_eq!(track.bottom_depth[1], 10.5);
    assert_relative_eq!(track.bottom_depth[4], 15.5);
}

#[rstest]
#[case::whole(&[0, 6])]
#[case::split_inside_gap(&[0, 3, 6])]
#[case::one_ping_each(&[0, 1, 2, 3, 4, 5, 6])]
fn interior_gaps_are_interpolated(#[case] cuts: &[usize]) {
    let track = detector().detect(&sv_segment()).unwrap();
    let pieces = cuts.windows(2).map(|w| track.slice(w[0]..w[1]));
    let bins = resample_tracks(&interpolating(), pieces).unwrap();

    let depths: Vec<f64> = bins.iter().map(|b| b.depth).collect();
    assert_eq!(depths.len(), 6);
    assert!(depths[0].is_nan());
    assert_relative_eq!(depths[1], 10.5);
    assert_relative_eq!(depths[2], 10.5 + 5.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(depths[3], 10.5 + 10.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(depths[4], 15.5);
    assert!(depths[5].is_nan());
}

#[test]
fn last_valid_leaves_gaps_empty() {
    let track = detector().detect(&sv_segment()).unwrap();
    let config = TrackConfig::builder().interval(S).build();
    let bins = resample_tracks(&config, [track]).unwrap();
    let complete: Vec<i64> = bins.iter().filter(|b| b.is_complete()).map(|b| b.ping_time).collect();
    assert_eq!(complete, vec![S, 4 * S]);
}

#[test]
fn depth_product_omits_unresolved_edges() {
    let dir = tempfile::tempdir().unwrap();
    let track = detector().detect(&sv_segment()).unwrap();
    let (head, tail) = track.split_at(3);
    let sink = ParquetSink::default();
    let first = dir.path().join("D1-T000000_depth.parquet");
    let second = dir.path().join("D1-T000003_depth.parquet");
    sink.write_track(&first, &head).unwrap();
    sink.write_track(&second, &tail).unwrap();

    let output = dir.path().join("depths.csv");
    let (rows, summary) = export_depths(&dispatcher(), &[first, second], &interpolating(), &output).unwrap();
    assert_eq!(rows, 4);
    assert_eq!(summary.failed, 0);

    let text = fs::read_to_string(&output).unwrap();
    let depths: Vec<&str> = text
        .lines()
        .skip(1)
        .map(|line| line.split(',').nth(3).unwrap())
        .collect();
    assert_eq!(depths, vec!["10.5", "12.2", "13.8", "15.5"]);
}

#[test]
fn nothing_detected_is_an_empty_product() {
    let dir = tempfile::tempdir().unwrap();
    let mut segment = sv_segment();
    segment.values.fill(-10.0);
    let track = detector().detect(&segment).unwrap();
    let path = dir.path().join("D1-T0_depth.parquet");
    ParquetSink::default().write_track(&path, &track).unwrap();

    let err = export_depths(&dispatcher(), &[path], &interpolating(), &dir.path().join("depths.csv")).unwrap_err();
    assert!(matches!(err, echogrid::EchoError::EmptyResult(_)));
}

#[test]
fn unreadable_track_fails_only_its_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("A-1_depth.parquet");
    ParquetSink::default()
        .write_track(&good, &detector().detect(&sv_segment()).unwrap())
        .unwrap();
    let bad = dir.path().join("B-1_depth.parquet");
    fs::write(&bad, b"not parquet").unwrap();

    let output = dir.path().join("depths.csv");
    let (rows, summary) = export_depths(&dispatcher(), &[good, bad], &interpolating(), &output).unwrap();
    assert_eq!(rows, 4);
    assert_eq!((summary.succeeded, summary.failed), (1, 1));
    let (label, reason) = &summary.failures[0];
    assert!(label.starts_with("B"));
    assert!(reason.contains("B-1_depth.parquet"), "{reason}");

    let text = fs::read_to_string(&output).unwrap();
    assert!(text.lines().skip(1).all(|line| line.ends_with(",A")));
}
