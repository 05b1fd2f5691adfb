//! Calibration over a set of detections with iterative outlier rejection.
//!
//! The loop runs one calibration over every successful detection, then
//! repeatedly drops detections whose mean error is far above the median
//! (median + k·MAD, capped by a configured bound) or whose worst point
//! exceeds a fixed bound, recalibrating from the previous intrinsics after
//! each round. It stops when a round removes nothing, when removal would
//! leave fewer than `min_samples` detections, or after `max_iterations`.

use crate::camera::CameraModel;
use crate::config::{CalibrationConfig, MIN_CALIBRATION_SAMPLES};
use crate::error::CalibrationError;
use crate::init::{estimate_pose, focal_from_homographies, plane_homography, Pose};
use crate::metrics::{CalibrationMetrics, HeatmapBundle};
use crate::residuals::{board_pose, compute_residuals};
use crate::solver::{refine, ViewData};
use dotboard_core::{mad, median};
use dotboard_detect::DetectionResult;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Final state of a calibration run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationOutput {
    pub success: bool,
    pub message: String,
    pub camera: CameraModel,
    pub image_size: (usize, usize),
    /// Every input detection, in input order, with calibration fields filled.
    pub all: Vec<DetectionResult>,
    pub kept: Vec<DetectionResult>,
    pub removed: Vec<DetectionResult>,
    pub metrics: CalibrationMetrics,
    pub heatmap: HeatmapBundle,
    /// Outlier rounds that removed at least one detection.
    pub iterations: u32,
}

struct Fit {
    camera: CameraModel,
    poses: Vec<Pose>,
    rms: f64,
}

fn check_abort(abort: &AtomicBool) -> Result<(), CalibrationError> {
    if abort.load(Ordering::Relaxed) {
        info!("calibration aborted");
        return Err(CalibrationError::Aborted);
    }
    Ok(())
}

/// Starting camera when no previous round exists: principal point at the
/// image center, focal length from the view homographies when they pin it
/// down.
fn initial_camera(
    detections: &[&DetectionResult],
    image_size: (usize, usize),
    cfg: &CalibrationConfig,
) -> CameraModel {
    let (cx, cy) = (image_size.0 as f64 * 0.5, image_size.1 as f64 * 0.5);
    let homographies: Vec<_> = detections
        .iter()
        .filter_map(|d| plane_homography(&d.object_points, &d.image_points))
        .collect();
    let (fx, fy) = match focal_from_homographies(&homographies, cx, cy) {
        Some((fx, fy)) if fx < 20.0 * cfg.initial_focal && fy < 20.0 * cfg.initial_focal => {
            (fx, fy)
        }
        _ => {
            debug!("focal not determined by views, using {}", cfg.initial_focal);
            (cfg.initial_focal, cfg.initial_focal)
        }
    };
    let mut camera = CameraModel::pinhole(fx, fy, cx, cy);
    camera.model = cfg.distortion_model;
    camera
}

fn calibrate_views(
    detections: &[&DetectionResult],
    image_size: (usize, usize),
    guess: Option<&CameraModel>,
    cfg: &CalibrationConfig,
) -> Result<Fit, CalibrationError> {
    let start = match guess {
        Some(camera) => camera.clone(),
        None => initial_camera(detections, image_size, cfg),
    };
    let poses = detections
        .iter()
        .map(|d| {
            estimate_pose(&start, &d.object_points, &d.image_points).ok_or_else(|| {
                CalibrationError::Solver(format!("no initial pose for {}", d.name))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let views: Vec<ViewData<'_>> = detections
        .iter()
        .map(|d| ViewData {
            object: &d.object_points,
            image: &d.image_points,
        })
        .collect();
    let solution = refine(&start, &poses, &views, &cfg.solver)?;
    info!(
        "calibrated {} views: rms {:.4} px, fx {:.2}, fy {:.2}, cx {:.2}, cy {:.2}",
        detections.len(),
        solution.rms,
        solution.camera.fx,
        solution.camera.fy,
        solution.camera.cx,
        solution.camera.cy
    );
    Ok(Fit {
        camera: solution.camera,
        poses: solution.poses,
        rms: solution.rms,
    })
}

fn select<'a>(all: &'a [DetectionResult], idx: &[usize]) -> Vec<&'a DetectionResult> {
    idx.iter().map(|&i| &all[i]).collect()
}

fn apply_fit(all: &mut [DetectionResult], kept: &[usize], fit: &Fit) {
    for (&i, pose) in kept.iter().zip(&fit.poses) {
        let det = &mut all[i];
        det.residuals = Some(compute_residuals(
            &fit.camera,
            pose,
            &det.object_points,
            &det.image_points,
        ));
        det.pose = Some(board_pose(pose));
    }
}

/// Adaptive per-image mean error threshold for one round.
pub fn mean_error_threshold(mean_errors: &[f64], cfg: &CalibrationConfig) -> f64 {
    let (Some(med), Some(spread)) = (median(mean_errors), mad(mean_errors)) else {
        return cfg.max_mean_error;
    };
    cfg.max_mean_error.min(med + cfg.mad_scale * spread.max(1e-3))
}

/// Calibrate from `detections` and reject outliers.
///
/// Failed detections are carried through untouched. Fails when fewer than
/// three detections succeeded, when the first solve fails, or when `abort`
/// is raised between phases. A failed refit in a later round keeps the
/// previous round's result.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(detections = detections.len()))
)]
pub fn calibrate_detections(
    detections: Vec<DetectionResult>,
    cfg: &CalibrationConfig,
    abort: &AtomicBool,
) -> Result<CalibrationOutput, CalibrationError> {
    calibrate_with(detections, cfg, abort, |views, size, guess| {
        calibrate_views(views, size, guess, cfg)
    })
}

/// Outlier loop over an arbitrary fitting routine. A failed refit ends the
/// loop and keeps the last successful round.
fn calibrate_with<F>(
    mut detections: Vec<DetectionResult>,
    cfg: &CalibrationConfig,
    abort: &AtomicBool,
    mut fit_views: F,
) -> Result<CalibrationOutput, CalibrationError>
where
    F: FnMut(
        &[&DetectionResult],
        (usize, usize),
        Option<&CameraModel>,
    ) -> Result<Fit, CalibrationError>,
{
    check_abort(abort)?;
    for det in &mut detections {
        det.iteration_removed = 0;
        det.residuals = None;
        det.pose = None;
    }
    let mut kept: Vec<usize> = (0..detections.len())
        .filter(|&i| detections[i].success)
        .collect();
    if kept.len() < MIN_CALIBRATION_SAMPLES {
        return Err(CalibrationError::NotEnoughDetections {
            found: kept.len(),
            required: MIN_CALIBRATION_SAMPLES,
        });
    }
    let image_size = detections[kept[0]].image_size;
    if kept.iter().any(|&i| detections[i].image_size != image_size) {
        warn!("detections come from images of different sizes; using {image_size:?}");
    }
    let min_samples = cfg.effective_min_samples();

    let mut fit = fit_views(&select(&detections, &kept), image_size, None)?;
    apply_fit(&mut detections, &kept, &fit);

    let mut iterations = 0;
    for round in 1..=cfg.max_iterations {
        check_abort(abort)?;
        let means: Vec<f64> = kept
            .iter()
            .filter_map(|&i| detections[i].mean_error())
            .collect();
        let threshold = mean_error_threshold(&means, cfg);
        let (remove, keep): (Vec<usize>, Vec<usize>) = kept.iter().copied().partition(|&i| {
            let d = &detections[i];
            d.mean_error().is_some_and(|e| e > threshold)
                || d.max_error().is_some_and(|e| e > cfg.max_point_error)
        });
        if remove.is_empty() {
            debug!("round {round}: nothing above {threshold:.3} px");
            break;
        }
        if keep.len() < min_samples {
            info!(
                "round {round}: removing {} would leave {} < {min_samples} samples; stopping",
                remove.len(),
                keep.len()
            );
            break;
        }
        for &i in &remove {
            let d = &mut detections[i];
            d.iteration_removed = round;
            info!(
                "round {round}: removed {} (mean {:.3} px, max {:.3} px, threshold {threshold:.3} px)",
                d.name,
                d.mean_error().unwrap_or(f64::NAN),
                d.max_error().unwrap_or(f64::NAN)
            );
        }
        check_abort(abort)?;
        match fit_views(&select(&detections, &keep), image_size, Some(&fit.camera)) {
            Ok(next) => fit = next,
            Err(err) => {
                warn!("round {round}: recalibration failed ({err}); keeping round {iterations}");
                for &i in &remove {
                    detections[i].iteration_removed = 0;
                }
                break;
            }
        }
        kept = keep;
        apply_fit(&mut detections, &kept, &fit);
        iterations = round;
    }
    check_abort(abort)?;

    let kept_list: Vec<DetectionResult> = detections
        .iter()
        .filter(|d| d.is_kept())
        .cloned()
        .collect();
    let removed: Vec<DetectionResult> = detections
        .iter()
        .filter(|d| d.iteration_removed > 0)
        .cloned()
        .collect();
    let metrics = CalibrationMetrics::from_detections(&detections, &kept_list, fit.rms);
    let heatmap = HeatmapBundle::from_detections(
        &kept_list,
        image_size,
        cfg.heatmap_cols,
        cfg.heatmap_rows,
    );
    let message = format!(
        "calibrated with {} of {} images (rms {:.3} px, {} removed)",
        kept_list.len(),
        detections.len(),
        fit.rms,
        removed.len()
    );
    info!("{message}");
    Ok(CalibrationOutput {
        success: true,
        message,
        camera: fit.camera,
        image_size,
        all: detections,
        kept: kept_list,
        removed,
        metrics,
        heatmap,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::DistortionModel;
    use dotboard_detect::{BoardSpec, SMALL_DOT_COUNT};
    use nalgebra::{Point2, Vector3};

    const SIZE: (usize, usize) = (1280, 960);

    fn truth() -> CameraModel {
        let mut cam = CameraModel::pinhole(1000.0, 995.0, 640.0, 480.0);
        cam.model = DistortionModel::Brown5;
        cam.distortion[0] = -0.08;
        cam.distortion[1] = 0.03;
        cam
    }

    fn pose(i: usize) -> Pose {
        let a = i as f64 * 0.9;
        Pose {
            rvec: Vector3::new(0.3 * a.cos(), 0.3 * a.sin(), 0.05 * i as f64),
            t: Vector3::new(
                -62.5 + 15.0 * a.sin(),
                -75.0 + 10.0 * a.cos(),
                520.0 + 20.0 * i as f64,
            ),
        }
    }

    fn detection(i: usize, cam: &CameraModel) -> DetectionResult {
        let spec = BoardSpec::default();
        let object_points = spec.build_object_points(SMALL_DOT_COUNT);
        let p = pose(i);
        let image_points = object_points
            .iter()
            .map(|o| cam.project_posed(&p.rvec, &p.t, o).expect("visible"))
            .collect();
        DetectionResult {
            name: format!("view_{i}.png"),
            success: true,
            image_size: SIZE,
            image_points,
            object_points,
            logical_indices: BoardSpec::logical_indices(),
            ..DetectionResult::default()
        }
    }

    fn config() -> CalibrationConfig {
        CalibrationConfig {
            distortion_model: DistortionModel::Brown5,
            ..CalibrationConfig::default()
        }
    }

    #[test]
    fn recovers_known_intrinsics_without_removals() {
        let cam = truth();
        let dets: Vec<_> = (0..5).map(|i| detection(i, &cam)).collect();
        let out = calibrate_detections(dets, &config(), &AtomicBool::new(false))
            .expect("calibrated");
        assert!(out.success);
        assert!(out.metrics.rms < 0.5, "rms {}", out.metrics.rms);
        assert!(out.removed.is_empty());
        assert_eq!(out.kept.len(), 5);
        assert!((out.camera.fx - 1000.0).abs() < 0.5, "fx {}", out.camera.fx);
        assert!((out.camera.fy - 995.0).abs() < 0.5, "fy {}", out.camera.fy);
        assert!((out.camera.cx - 640.0).abs() < 0.5);
        assert!(out.kept.iter().all(|d| d.pose.is_some() && d.residuals.is_some()));
        assert_eq!(out.image_size, SIZE);
    }

    #[test]
    fn full_model_fits_exact_points() {
        let cam = truth();
        let dets: Vec<_> = (0..4).map(|i| detection(i, &cam)).collect();
        let out = calibrate_detections(dets, &CalibrationConfig::default(), &AtomicBool::new(false))
            .expect("calibrated");
        assert!(out.metrics.rms < 0.5, "rms {}", out.metrics.rms);
        assert_eq!(out.camera.model, DistortionModel::Full14);
    }

    #[test]
    fn too_few_detections_fail() {
        let cam = truth();
        let mut dets: Vec<_> = (0..2).map(|i| detection(i, &cam)).collect();
        dets.push(DetectionResult::failure("bad.png", SIZE, "board-boundary: none".into()));
        let err = calibrate_detections(dets, &config(), &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::NotEnoughDetections { found: 2, required: 3 }
        ));
    }

    #[test]
    fn abort_flag_stops_the_run() {
        let cam = truth();
        let dets: Vec<_> = (0..4).map(|i| detection(i, &cam)).collect();
        let err = calibrate_detections(dets, &config(), &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, CalibrationError::Aborted));
    }

    #[test]
    fn noisy_view_is_removed_in_first_round() {
        let cam = truth();
        let mut dets: Vec<_> = (0..7).map(|i| detection(i, &cam)).collect();
        for (k, p) in dets[3].image_points.iter_mut().enumerate() {
            let s = if k % 2 == 0 { 4.0 } else { -4.0 };
            *p += nalgebra::Vector2::new(s, -s);
        }
        dets.push(DetectionResult::failure("blank.png", SIZE, "board-boundary: none".into()));
        let out = calibrate_detections(dets, &config(), &AtomicBool::new(false))
            .expect("calibrated");
        assert_eq!(out.all[3].iteration_removed, 1);
        assert!(out.removed.iter().any(|d| d.name == "view_3.png"));
        assert!(out.kept.iter().all(|d| d.name != "view_3.png"));
        assert!(out.kept.len() >= 3);
        assert!(out.kept.iter().all(|d| d.mean_error().expect("residuals") < 0.01));
        assert!(out.iterations >= 1);
        assert!(!out.all[7].success && out.all[7].iteration_removed == 0);
        assert_eq!(out.metrics.total_images, 8);
    }

    #[test]
    fn loop_never_drops_below_min_samples() {
        let cam = truth();
        let mut dets: Vec<_> = (0..3).map(|i| detection(i, &cam)).collect();
        dets[0].image_points[0] += nalgebra::Vector2::new(30.0, 0.0);
        let out = calibrate_detections(dets, &config(), &AtomicBool::new(false))
            .expect("calibrated");
        assert_eq!(out.kept.len(), 3);
        assert!(out.removed.is_empty());
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn failed_refit_keeps_the_previous_round() {
        let cam = truth();
        let mut dets: Vec<_> = (0..7).map(|i| detection(i, &cam)).collect();
        for (k, p) in dets[3].image_points.iter_mut().enumerate() {
            let s = if k % 2 == 0 { 4.0 } else { -4.0 };
            *p += nalgebra::Vector2::new(s, -s);
        }
        let cfg = config();
        let mut calls = 0;
        let out = calibrate_with(dets, &cfg, &AtomicBool::new(false), |views, size, guess| {
            calls += 1;
            if calls > 1 {
                return Err(CalibrationError::Solver("diverged".into()));
            }
            calibrate_views(views, size, guess, &cfg)
        })
        .expect("first round result survives");
        assert_eq!(calls, 2);
        assert!(out.success);
        assert_eq!(out.iterations, 0);
        assert!(out.removed.is_empty());
        assert_eq!(out.kept.len(), 7);
        assert!(out.all.iter().all(|d| d.iteration_removed == 0));
        assert!(out.all[3].mean_error().expect("residuals") > 1.0);
        assert!((out.camera.fx - 1000.0).abs() < 50.0, "fx {}", out.camera.fx);
    }

    #[test]
    fn threshold_is_capped_by_configured_mean() {
        let cfg = config();
        assert_eq!(mean_error_threshold(&[5.0, 6.0, 7.0], &cfg), 2.0);
        let t = mean_error_threshold(&[0.1, 0.1, 0.1], &cfg);
        assert!((t - (0.1 + 3.5e-3)).abs() < 1e-12);
    }

    #[test]
    fn image_points_are_untouched() {
        let cam = truth();
        let dets: Vec<_> = (0..3).map(|i| detection(i, &cam)).collect();
        let before: Vec<Vec<Point2<f64>>> = dets.iter().map(|d| d.image_points.clone()).collect();
        let out = calibrate_detections(dets, &config(), &AtomicBool::new(false))
            .expect("calibrated");
        for (d, b) in out.all.iter().zip(before) {
            assert_eq!(d.image_points, b);
        }
    }
}
