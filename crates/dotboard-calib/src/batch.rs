//! Parallel detection over many images followed by calibration.

use crate::calibrate::{calibrate_detections, CalibrationOutput};
use crate::config::{CalibrationConfig, RunConfig};
use crate::error::CalibrationError;
use dotboard_core::GrayImage;
use dotboard_detect::{luma_view, BoardSpec, DetectionConfig, DetectionResult, DotBoardDetector};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// File extensions picked up by [`list_images`], lowercase.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// An already decoded image with its display name.
#[derive(Clone, Debug)]
pub struct NamedImage {
    pub name: String,
    pub image: GrayImage,
}

impl NamedImage {
    pub fn new(name: impl Into<String>, image: GrayImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }
}

fn build_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, CalibrationError> {
    let n = threads.filter(|&n| n > 0).unwrap_or_else(num_cpus_hint);
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .thread_name(|idx| format!("dotboard-detect-{idx}"))
        .build()?)
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Run `detect` over `items` on a worker pool, keeping input order. Items
/// not yet started when `abort` is raised are skipped and the whole batch
/// reports [`CalibrationError::Aborted`].
fn detect_parallel<T, F>(
    items: &[T],
    threads: Option<usize>,
    abort: &AtomicBool,
    detect: F,
) -> Result<Vec<DetectionResult>, CalibrationError>
where
    T: Sync,
    F: Fn(&T) -> DetectionResult + Sync,
{
    let pool = build_pool(threads)?;
    let results: Vec<Option<DetectionResult>> = pool.install(|| {
        items
            .par_iter()
            .map(|item| {
                if abort.load(Ordering::Relaxed) {
                    return None;
                }
                let result = detect(item);
                if result.success {
                    debug!("{}: detected in {:.1} ms", result.name, result.elapsed_ms);
                } else {
                    info!("{}: {}", result.name, result.message);
                }
                Some(result)
            })
            .collect()
    });
    if abort.load(Ordering::Relaxed) {
        return Err(CalibrationError::Aborted);
    }
    Ok(results.into_iter().flatten().collect())
}

/// Detect the board in every image, in parallel, preserving order.
pub fn detect_images(
    detector: &DotBoardDetector,
    images: &[NamedImage],
    threads: Option<usize>,
    abort: &AtomicBool,
) -> Result<Vec<DetectionResult>, CalibrationError> {
    detect_parallel(images, threads, abort, |img| {
        detector.detect(&img.image.view(), &img.name)
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decode one file to 8-bit gray.
pub fn load_gray(path: impl AsRef<Path>) -> Result<image::GrayImage, CalibrationError> {
    Ok(image::open(path)?.to_luma8())
}

/// Decode and detect each file on a worker. Unreadable files become failed
/// detections.
pub fn detect_files(
    detector: &DotBoardDetector,
    paths: &[PathBuf],
    threads: Option<usize>,
    abort: &AtomicBool,
) -> Result<Vec<DetectionResult>, CalibrationError> {
    detect_parallel(paths, threads, abort, |path| {
        let name = display_name(path);
        match load_gray(path) {
            Ok(img) => detector.detect(&luma_view(&img), &name),
            Err(err) => {
                warn!("{}: cannot read image: {err}", path.display());
                let message = format!("input: cannot read image: {err}");
                DetectionResult::failure(&name, (0, 0), message)
            }
        }
    })
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, CalibrationError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Detect the board in `images` and calibrate from the results.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(images = images.len()))
)]
pub fn run_calibration(
    images: &[NamedImage],
    board: BoardSpec,
    detection: DetectionConfig,
    calibration: &CalibrationConfig,
    abort: &AtomicBool,
) -> Result<CalibrationOutput, CalibrationError> {
    if images.is_empty() {
        return Err(CalibrationError::NoImages);
    }
    let detector = DotBoardDetector::new(board, detection);
    let detections = detect_images(&detector, images, calibration.threads, abort)?;
    calibrate_detections(detections, calibration, abort)
}

/// Load every image under `cfg.input_dir`, detect and calibrate.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn run_directory(
    cfg: &RunConfig,
    abort: &AtomicBool,
) -> Result<CalibrationOutput, CalibrationError> {
    let paths = list_images(&cfg.input_dir)?;
    if paths.is_empty() {
        return Err(CalibrationError::NoImages);
    }
    info!("found {} images in {}", paths.len(), cfg.input_dir.display());
    let detector = DotBoardDetector::new(cfg.board, cfg.detection.clone());
    let detections = detect_files(&detector, &paths, cfg.calibration.threads, abort)?;
    let ok = detections.iter().filter(|d| d.success).count();
    info!("detected the board in {ok} of {} images", detections.len());
    calibrate_detections(detections, &cfg.calibration, abort)
}
