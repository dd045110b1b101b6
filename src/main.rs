use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::info;
use tracing_subscriber::EnvFilter;

use echogrid::calibration::SonarEquation;
use echogrid::config::{
    BottomConfig, CalibrationParams, DEFAULT_PING_BIN, DEFAULT_RANGE_BIN, DEFAULT_TRACK_INTERVAL,
    DispatchConfig, EncodeMode, GridConfig, TrackConfig, WaveformMode, parse_range_bin,
    parse_time_bin,
};
use echogrid::dispatch::{Dispatcher, RunSummary, Stage};
use echogrid::processing::{BottomDetector, Reducer};
use echogrid::sink::ParquetSink;
use echogrid::stages::{
    BottomStage, CalibrateStage, ConvertStage, DEFAULT_CONVERT_DIR, DEFAULT_DEPTH_DIR,
    DEFAULT_MVBS_DIR, DEFAULT_SV_DIR, MvbsStage, deployment_groups, export_depths,
};
use echogrid::types::CalibrationReference;
use echogrid::utils::file_utils::find_files;

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming echosounder gridding pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert raw datagram files into power segments
    Convert(ConvertArgs),
    /// Calibrate power segments into Sv segments
    Calibrate(CalibrateArgs),
    /// Grid Sv segments into mean volume backscattering strength
    Mvbs(MvbsArgs),
    /// Detect the bottom line of Sv segments
    Bottom(BottomArgs),
    /// Resample depth tracks into a CSV depth product
    Depths(DepthsArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Input files or glob patterns (`~` and environment variables are expanded)
    #[arg(value_hint = ValueHint::FilePath)]
    inputs: Vec<String>,

    /// Output directory; relative paths are resolved against each input's directory
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    out_dir: Option<PathBuf>,

    /// Skip inputs whose output already exists
    #[arg(long)]
    skip_existing: bool,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Threads per worker
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl CommonArgs {
    fn out_dir(&self, default: &str) -> PathBuf {
        self.out_dir.clone().unwrap_or_else(|| PathBuf::from(default))
    }

    fn dispatcher(&self) -> Result<Dispatcher> {
        let config = DispatchConfig::builder()
            .workers(self.workers)
            .threads(self.threads)
            .skip_existing(self.skip_existing)
            .build();
        Ok(Dispatcher::new(config)?)
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// JSON calibration reference with per-channel sonar-equation parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    calibration: PathBuf,

    #[arg(long, value_enum, ignore_case = true, default_value_t = EncodeMode::Power)]
    encode_mode: EncodeMode,

    #[arg(long, value_enum, ignore_case = true, default_value_t = WaveformMode::Cw)]
    waveform_mode: WaveformMode,

    /// Depth offset (metres) added when computing depth
    #[arg(long, default_value_t = 1.0)]
    depth_offset: f64,
}

#[derive(Args, Debug)]
struct MvbsArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Time bin width, e.g. 5s or 1min
    #[arg(long, default_value = DEFAULT_PING_BIN, value_parser = time_width)]
    ping_bin: i64,

    /// Range bin width, e.g. 1.0m
    #[arg(long, default_value = DEFAULT_RANGE_BIN, value_parser = range_width)]
    range_bin: f64,
}

#[derive(Args, Debug)]
struct BottomArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Channel identifier or frequency (e.g. 38kHz); defaults to the first channel
    #[arg(long)]
    channel: Option<String>,

    /// Detection threshold in dB
    #[arg(long, default_value_t = -40.0, allow_negative_numbers = true)]
    threshold: f64,

    /// Range samples ignored below the transducer
    #[arg(long, default_value_t = 300)]
    skip_from_surface: usize,

    /// Metres added to every detected depth
    #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
    offset: f64,
}

#[derive(Args, Debug)]
struct DepthsArgs {
    /// Depth track files or glob patterns
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<String>,

    /// Resampling interval
    #[arg(short, long, default_value = DEFAULT_TRACK_INTERVAL, value_parser = time_width)]
    resample: i64,

    #[arg(long, value_enum, default_value_t = ResampleOpt::Last)]
    reducer: ResampleOpt,

    /// CSV file to write
    #[arg(short, long, default_value = "depths.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Deployments resampled concurrently
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Threads per worker
    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ResampleOpt {
    Last,
    Interpolate,
}

fn time_width(text: &str) -> std::result::Result<i64, String> {
    parse_time_bin(text).map_err(|e| e.to_string())
}

fn range_width(text: &str) -> std::result::Result<f64, String> {
    parse_range_bin(text).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Convert(args) => args.common.verbose,
        Command::Calibrate(args) => args.common.verbose,
        Command::Mvbs(args) => args.common.verbose,
        Command::Bottom(args) => args.common.verbose,
        Command::Depths(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Convert(args) => handle_convert(args),
        Command::Calibrate(args) => handle_calibrate(args),
        Command::Mvbs(args) => handle_mvbs(args),
        Command::Bottom(args) => handle_bottom(args),
        Command::Depths(args) => handle_depths(args),
    }
}

/// Resolves inputs; `None` means there is nothing to do.
fn find_inputs(patterns: &[String]) -> Result<Option<Vec<PathBuf>>> {
    let files = find_files(patterns).context("resolving input patterns")?;
    if files.is_empty() {
        info!("No input files found. Nothing done.");
        return Ok(None);
    }
    info!(count = files.len(), "found input files");
    Ok(Some(files))
}

fn finish(summary: RunSummary) -> Result<()> {
    for (item, reason) in &summary.failures {
        tracing::error!(%item, %reason, "item failed");
    }
    summary.ensure_output()?;
    Ok(())
}

fn dispatch<S: Stage>(common: &CommonArgs, stage: &S, items: &[S::Item]) -> Result<()> {
    let dispatcher = common.dispatcher()?;
    finish(dispatcher.run(stage, items))
}

fn handle_convert(args: ConvertArgs) -> Result<()> {
    let Some(files) = find_inputs(&args.common.inputs)? else {
        return Ok(());
    };
    let stage = ConvertStage {
        out_dir: args.common.out_dir(DEFAULT_CONVERT_DIR),
    };
    dispatch(&args.common, &stage, &files)
}

fn handle_calibrate(args: CalibrateArgs) -> Result<()> {
    let Some(files) = find_inputs(&args.common.inputs)? else {
        return Ok(());
    };
    let reference = CalibrationReference::load(&args.calibration)
        .with_context(|| format!("loading calibration reference {}", args.calibration.display()))?;
    let params = CalibrationParams::builder()
        .encode_mode(args.encode_mode)
        .waveform_mode(args.waveform_mode)
        .depth_offset(args.depth_offset)
        .build();
    let stage = CalibrateStage {
        out_dir: args.common.out_dir(DEFAULT_SV_DIR),
        provider: SonarEquation::new(reference),
        params,
    };
    dispatch(&args.common, &stage, &files)
}

fn handle_mvbs(args: MvbsArgs) -> Result<()> {
    let grid = GridConfig::builder()
        .ping_bin(args.ping_bin)
        .range_bin(args.range_bin)
        .build();
    grid.validate()?;
    let Some(files) = find_inputs(&args.common.inputs)? else {
        return Ok(());
    };
    let groups = deployment_groups(&files);
    info!(deployments = groups.len(), "grouped inputs by deployment");
    let stage = MvbsStage {
        out_dir: args.common.out_dir(DEFAULT_MVBS_DIR),
        grid,
        sink: ParquetSink::default(),
    };
    dispatch(&args.common, &stage, &groups)
}

fn handle_bottom(args: BottomArgs) -> Result<()> {
    let config = BottomConfig::builder()
        .maybe_channel(args.channel)
        .threshold_db(args.threshold)
        .skip_from_surface(args.skip_from_surface)
        .offset_m(args.offset)
        .build();
    let detector = BottomDetector::new(&config)?;
    let Some(files) = find_inputs(&args.common.inputs)? else {
        return Ok(());
    };
    let stage = BottomStage {
        out_dir: args.common.out_dir(DEFAULT_DEPTH_DIR),
        detector,
        sink: ParquetSink::default(),
    };
    dispatch(&args.common, &stage, &files)
}

fn handle_depths(args: DepthsArgs) -> Result<()> {
    let config = TrackConfig::builder()
        .interval(args.resample)
        .reducer(match args.reducer {
            ResampleOpt::Last => Reducer::LastValid,
            ResampleOpt::Interpolate => Reducer::Interpolate,
        })
        .build();
    config.validate()?;
    let Some(files) = find_inputs(&args.inputs)? else {
        return Ok(());
    };
    let dispatcher = Dispatcher::new(
        DispatchConfig::builder()
            .workers(args.workers)
            .threads(args.threads)
            .build(),
    )?;
    let (rows, summary) = export_depths(&dispatcher, &files, &config, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(rows, output = %args.output.display(), "depth product written");
    finish(summary)
}
