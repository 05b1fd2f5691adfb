//! `dotboard` command-line tool.
//!
//! Exit codes: 0 on success, 1 on invalid arguments or configuration,
//! 2 when detection or calibration fails.

use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser, Subcommand};
use dotboard::calib::{load_gray, run_directory, CalibrationReport, RunConfig};
use dotboard::{gray_view, BoardSpec, DotBoardDetector};
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::{fs, io};

const EXIT_USAGE: u8 = 1;
const EXIT_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "dotboard")]
#[command(about = "Detect an asymmetric dot board and calibrate a camera from it")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the board in every image of a directory and calibrate.
    Calibrate(CalibrateArgs),
    /// Detect the board in one image and print the result as JSON.
    Detect(DetectArgs),
}

#[derive(Debug, Clone, Args)]
struct BoardArgs {
    /// Small-dot diameter in millimetres.
    #[arg(long)]
    diameter: Option<f64>,

    /// Dot center spacing in millimetres.
    #[arg(long)]
    spacing: Option<f64>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Directory with the calibration images.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory the JSON report is written to.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run configuration (JSON). Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    board: BoardArgs,

    /// Cap on the adaptive per-image mean error threshold (px).
    #[arg(long)]
    max_mean_error: Option<f64>,

    /// Any point error above this removes the image (px).
    #[arg(long)]
    max_point_error: Option<f64>,

    /// Outlier rejection rounds.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Never keep fewer images than this.
    #[arg(long)]
    min_samples: Option<usize>,

    /// Detection worker threads (default: all cores).
    #[arg(long)]
    threads: Option<usize>,

    /// Write per-stage debug images to temporary directories.
    #[arg(long)]
    debug_images: bool,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Image to run detection on.
    #[arg(long)]
    image: PathBuf,

    /// Run configuration (JSON); only `board` and `detection` are used.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    board: BoardArgs,

    /// Write the JSON here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

/// Why a command stopped, mapped onto the exit code.
enum CliError {
    Usage(String),
    Failed(String),
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

type CliResult<T> = Result<T, CliError>;

fn init_logging(verbose: u8) {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        dotboard::core::init_tracing(false);
        let _ = verbose;
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = dotboard::core::init_with_level(dotboard::core::level_from_verbosity(verbose));
    }
}

fn load_config(path: Option<&Path>) -> CliResult<RunConfig> {
    match path {
        Some(path) => RunConfig::load_json(path).map_err(|err| {
            CliError::Usage(format!("cannot read config {}: {err}", path.display()))
        }),
        None => Ok(RunConfig::default()),
    }
}

fn apply_board(board: &mut BoardSpec, args: &BoardArgs) -> CliResult<()> {
    if let Some(d) = args.diameter {
        board.small_diameter_mm = d;
    }
    if let Some(s) = args.spacing {
        board.spacing_mm = s;
    }
    board
        .validate()
        .map_err(|err| CliError::Usage(format!("invalid board: {err}")))
}

fn run_calibrate(args: &CalibrateArgs) -> CliResult<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(input) = &args.input {
        cfg.input_dir = input.clone();
    }
    if let Some(output) = &args.output {
        cfg.output_dir = output.clone();
    }
    apply_board(&mut cfg.board, &args.board)?;
    let cal = &mut cfg.calibration;
    if let Some(v) = args.max_mean_error {
        cal.max_mean_error = v;
    }
    if let Some(v) = args.max_point_error {
        cal.max_point_error = v;
    }
    if let Some(v) = args.max_iterations {
        cal.max_iterations = v;
    }
    if let Some(v) = args.min_samples {
        cal.min_samples = v;
    }
    if args.threads.is_some() {
        cal.threads = args.threads;
    }
    if args.debug_images {
        cfg.detection.debug_images = true;
    }
    for (name, v) in [
        ("--max-mean-error", cfg.calibration.max_mean_error),
        ("--max-point-error", cfg.calibration.max_point_error),
    ] {
        if !v.is_finite() || v <= 0.0 {
            return Err(CliError::Usage(format!("{name} must be positive (got {v})")));
        }
    }
    if cfg.input_dir.as_os_str().is_empty() {
        return Err(CliError::Usage("no input directory given (--input)".into()));
    }
    if !cfg.input_dir.is_dir() {
        return Err(CliError::Usage(format!(
            "input directory {} does not exist",
            cfg.input_dir.display()
        )));
    }

    let abort = AtomicBool::new(false);
    let output = run_directory(&cfg, &abort)
        .map_err(|err| CliError::Failed(format!("calibration failed: {err}")))?;
    if cfg.detection.debug_images {
        for dir in output.all.iter().filter_map(|d| d.debug_dir.as_ref()) {
            info!("debug images in {}", dir.display());
        }
    }
    let report = CalibrationReport::from_output(&output);
    let path = cfg.report_path();
    report
        .write_json(&path)
        .map_err(|err| CliError::Failed(format!("cannot write {}: {err}", path.display())))?;
    info!("wrote report to {}", path.display());
    println!("{}", report.summary());
    Ok(())
}

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    apply_board(&mut cfg.board, &args.board)?;
    let img = load_gray(&args.image).map_err(|err| {
        CliError::Usage(format!("cannot read image {}: {err}", args.image.display()))
    })?;
    let name = args
        .image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let detector = DotBoardDetector::new(cfg.board, cfg.detection);
    let result = detector.detect(&gray_view(&img), &name);
    let json = serde_json::to_string_pretty(&result)
        .map_err(|err| CliError::Failed(err.to_string()))?;
    match &args.out {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }
    if result.success {
        Ok(())
    } else {
        Err(CliError::Failed(format!("detection failed: {}", result.message)))
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };
    init_logging(cli.verbose);

    let outcome = match &cli.command {
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::Detect(args) => run_detect(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_USAGE)
        }
        Err(CliError::Failed(msg)) => {
            eprintln!("{msg}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}
