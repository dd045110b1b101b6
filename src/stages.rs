//! Concrete pipeline stages run through the dispatcher

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::calibration::{Calibration, CalibrationProvider};
use crate::config::{CalibrationParams, GridConfig, TrackConfig};
use crate::dispatch::{Dispatcher, RunSummary, Stage, StageStatus, WorkItem};
use crate::error::{EchoError, Result};
use crate::processing::{BottomDetector, grid_engine, track_engine};
use crate::raw_file::RawFile;
use crate::segment_file::read_segment;
use crate::sink::{self, DepthRow, ParquetSink};
use crate::utils::file_utils::{derived_path, group_by_deployment, resolve_out_dir};

pub const DEFAULT_CONVERT_DIR: &str = "../converted/";
pub const DEFAULT_SV_DIR: &str = "../sv/";
pub const DEFAULT_MVBS_DIR: &str = "../MVBS/";
pub const DEFAULT_DEPTH_DIR: &str = "../depth/";

/// Ordered files of one deployment, fed through a single engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentGroup {
    pub id: String,
    pub files: Vec<PathBuf>,
}

impl WorkItem for DeploymentGroup {
    fn label(&self) -> String {
        format!("{} ({} files)", self.id, self.files.len())
    }
}

pub fn deployment_groups(paths: &[PathBuf]) -> Vec<DeploymentGroup> {
    group_by_deployment(paths)
        .into_iter()
        .map(|(id, files)| DeploymentGroup { id, files })
        .collect()
}

/// Raw datagram file to power segment.
pub struct ConvertStage {
    pub out_dir: PathBuf,
}

impl Stage for ConvertStage {
    type Item = PathBuf;

    fn name(&self) -> &str {
        "convert"
    }

    fn output_path(&self, item: &PathBuf) -> PathBuf {
        derived_path(item, &self.out_dir, "", "seg")
    }

    fn run(&self, item: &PathBuf, output: &Path) -> Result<StageStatus> {
        let segment = RawFile::open(item)?.to_segment()?;
        if segment.is_empty() {
            return Ok(StageStatus::Skipped("file holds no pings".to_string()));
        }
        sink::write_segment(output, &segment)?;
        Ok(StageStatus::Written)
    }
}

/// Power segment to Sv segment.
pub struct CalibrateStage<P> {
    pub out_dir: PathBuf,
    pub provider: P,
    pub params: CalibrationParams,
}

impl<P: CalibrationProvider> Stage for CalibrateStage<P> {
    type Item = PathBuf;

    fn name(&self) -> &str {
        "calibrate"
    }

    fn output_path(&self, item: &PathBuf) -> PathBuf {
        derived_path(item, &self.out_dir, "_Sv", "seg")
    }

    fn run(&self, item: &PathBuf, output: &Path) -> Result<StageStatus> {
        let segment = read_segment(item)?;
        match self.provider.calibrate(&segment, &self.params)? {
            Calibration::Calibrated(sv) => {
                sink::write_segment(output, &sv)?;
                Ok(StageStatus::Written)
            }
            Calibration::Skip(reason) => Ok(StageStatus::Skipped(reason)),
        }
    }
}

/// Sv segments of one deployment to an MVBS grid.
pub struct MvbsStage {
    pub out_dir: PathBuf,
    pub grid: GridConfig,
    pub sink: ParquetSink,
}

impl Stage for MvbsStage {
    type Item = DeploymentGroup;

    fn name(&self) -> &str {
        "mvbs"
    }

    fn output_path(&self, item: &DeploymentGroup) -> PathBuf {
        let anchor = item.files.first().map(PathBuf::as_path).unwrap_or(Path::new("."));
        resolve_out_dir(anchor, &self.out_dir).join(format!("{}_MVBS.parquet", item.id))
    }

    fn run(&self, item: &DeploymentGroup, output: &Path) -> Result<StageStatus> {
        let mut engine = grid_engine(&self.grid)?;
        let mut bins = Vec::new();
        for file in &item.files {
            let segment = read_segment(file)?;
            debug!(deployment = %item.id, path = %file.display(), pings = segment.len(), "binning");
            bins.extend(engine.process(segment)?);
        }
        bins.extend(engine.finalize()?);

        if bins.iter().all(|b| b.value.is_nan()) {
            return Err(EchoError::EmptyResult(format!(
                "every MVBS cell of deployment {} is NaN",
                item.id
            )));
        }
        self.sink.write_bins(output, &bins)?;
        Ok(StageStatus::Written)
    }
}

/// Sv segment to per-ping bottom line.
pub struct BottomStage {
    pub out_dir: PathBuf,
    pub detector: BottomDetector,
    pub sink: ParquetSink,
}

impl Stage for BottomStage {
    type Item = PathBuf;

    fn name(&self) -> &str {
        "bottom"
    }

    fn output_path(&self, item: &PathBuf) -> PathBuf {
        derived_path(item, &self.out_dir, "_depth", "parquet")
    }

    fn run(&self, item: &PathBuf, output: &Path) -> Result<StageStatus> {
        let segment = read_segment(item)?;
        let track = self.detector.detect(&segment)?;
        debug!(path = %item.display(), pings = track.len(), detections = track.detections(), "bottom line");
        self.sink.write_track(output, &track)?;
        Ok(StageStatus::Written)
    }
}

/// Resampled depth rows of one deployment, files fed in sorted order.
fn resample_group(config: &TrackConfig, group: &DeploymentGroup) -> Result<Vec<DepthRow>> {
    let mut engine = track_engine(config)?;
    let mut bins = Vec::new();
    for file in &group.files {
        let track = sink::read_track(file)?;
        debug!(path = %file.display(), pings = track.len(), "resampling track");
        bins.extend(engine.process(track)?);
    }
    bins.extend(engine.finalize()?);
    Ok(bins
        .into_iter()
        .map(|bin| DepthRow {
            deployment: group.id.clone(),
            bin,
        })
        .collect())
}

/// Resamples depth tracks per deployment on the dispatcher's pool and writes
/// the depth product CSV.
///
/// A deployment that fails is recorded in the returned summary and left out
/// of the product; the others are still written. Returns the number of rows
/// written.
pub fn export_depths(
    dispatcher: &Dispatcher,
    inputs: &[PathBuf],
    config: &TrackConfig,
    output: &Path,
) -> Result<(usize, RunSummary)> {
    config.validate()?;
    if inputs.is_empty() {
        return Ok((0, RunSummary::default()));
    }
    let groups = deployment_groups(inputs);
    let (resampled, summary) = dispatcher.collect("depths", &groups, |group| resample_group(config, group));

    let mut rows: Vec<DepthRow> = resampled.into_iter().flatten().collect();
    rows.sort_by_key(|r| r.bin.ping_time);
    let written = sink::write_depth_csv(output, &rows)?;
    info!(
        output = %output.display(),
        deployments = groups.len(),
        failed = summary.failed,
        rows = written,
        "wrote depth product"
    );
    if written == 0 {
        return Err(EchoError::EmptyResult(format!(
            "no complete depth rows in {} input files ({} deployments failed)",
            inputs.len(),
            summary.failed
        )));
    }
    Ok((written, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_follow_naming_rules() {
        let raw = PathBuf::from("/d/raw/250501WF-D20250501-T181250.raw");
        let convert = ConvertStage {
            out_dir: PathBuf::from(DEFAULT_CONVERT_DIR),
        };
        assert_eq!(
            convert.output_path(&raw),
            PathBuf::from("/d/converted/250501WF-D20250501-T181250.seg")
        );

        let group = DeploymentGroup {
            id: "250501WF".to_string(),
            files: vec![PathBuf::from("/d/sv/250501WF-D20250501-T181250_Sv.seg")],
        };
        let mvbs = MvbsStage {
            out_dir: PathBuf::from(DEFAULT_MVBS_DIR),
            grid: GridConfig::default(),
            sink: ParquetSink::default(),
        };
        assert_eq!(mvbs.output_path(&group), PathBuf::from("/d/MVBS/250501WF_MVBS.parquet"));
        assert_eq!(group.label(), "250501WF (1 files)");
    }

    #[test]
    fn groups_split_by_deployment() {
        let groups = deployment_groups(&[
            PathBuf::from("A-1.seg"),
            PathBuf::from("B-1.seg"),
            PathBuf::from("A-2.seg"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].files, vec![PathBuf::from("A-1.seg"), PathBuf::from("A-2.seg")]);
    }
}
