//! Camera calibration from dot-board detections.
//!
//! ## Quickstart
//!
//! ```no_run
//! use dotboard_calib::{run_directory, CalibrationReport, RunConfig};
//! use std::sync::atomic::AtomicBool;
//!
//! let cfg = RunConfig::load_json("run.json")?;
//! let output = run_directory(&cfg, &AtomicBool::new(false))?;
//! CalibrationReport::from_output(&output).write_json(cfg.report_path())?;
//! # Ok::<(), dotboard_calib::CalibrationError>(())
//! ```
//!
//! Calibration fits a pinhole camera with up to 14 distortion terms by
//! Levenberg-Marquardt, seeded from plane homographies. Outlier views are
//! dropped round by round against a median + k·MAD threshold on their mean
//! reprojection error.

mod batch;
mod calibrate;
mod camera;
mod config;
mod error;
mod init;
mod metrics;
mod report;
mod residuals;
mod solver;

pub use batch::{
    detect_files, detect_images, list_images, load_gray, run_calibration, run_directory,
    NamedImage, IMAGE_EXTENSIONS,
};
pub use calibrate::{calibrate_detections, mean_error_threshold, CalibrationOutput};
pub use camera::{CameraModel, DistortionModel, DISTORTION_COEFFS};
pub use config::{CalibrationConfig, RunConfig, MIN_CALIBRATION_SAMPLES};
pub use error::CalibrationError;
pub use init::{
    estimate_pose, focal_from_homographies, plane_homography, pose_from_normalized_homography,
    Pose,
};
pub use metrics::{CalibrationMetrics, HeatmapBundle};
pub use report::{CalibrationReport, FailedSample, SampleReport};
pub use residuals::{board_pose, compute_residuals};
pub use solver::{refine, Solution, SolverOptions, ViewData};
