use dotboard_calib::{
    run_calibration, CalibrationConfig, CalibrationError, CalibrationReport, DistortionModel,
    NamedImage,
};
use dotboard_core::GrayImage;
use dotboard_detect::synthetic::{pose_homography, SyntheticBoard};
use dotboard_detect::{BoardSpec, DetectionConfig};
use nalgebra::{Matrix3, Rotation3, Vector3};
use std::sync::atomic::AtomicBool;

const WIDTH: usize = 960;
const HEIGHT: usize = 800;
const FOCAL: f64 = 1200.0;

fn camera_matrix() -> Matrix3<f64> {
    Matrix3::new(FOCAL, 0.0, 480.0, 0.0, FOCAL, 400.0, 0.0, 0.0, 1.0)
}

fn render_view(euler: (f64, f64, f64), distance: f64) -> GrayImage {
    let spec = BoardSpec::default();
    let flip = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
    let r = Rotation3::from_euler_angles(euler.0, euler.1, euler.2).into_inner() * flip;
    let board_center = Vector3::new(56.0, 81.0, 0.0);
    let t = Vector3::new(0.0, 0.0, distance) - r * board_center;
    let h = pose_homography(&spec, &camera_matrix(), &r, &t);
    SyntheticBoard::new(spec).render(WIDTH, HEIGHT, &h)
}

fn views() -> Vec<NamedImage> {
    [
        ((0.25, -0.2, 0.05), 700.0),
        ((-0.25, 0.2, -0.05), 720.0),
        ((0.2, 0.25, 0.1), 680.0),
        ((-0.2, -0.25, 0.0), 740.0),
    ]
    .iter()
    .enumerate()
    .map(|(i, &(e, z))| NamedImage::new(format!("view_{i}.png"), render_view(e, z)))
    .collect()
}

#[test]
fn calibrates_from_rendered_views() {
    let mut images = views();
    images.push(NamedImage::new("blank.png", GrayImage::filled(WIDTH, HEIGHT, 255)));
    let cfg = CalibrationConfig {
        distortion_model: DistortionModel::Brown5,
        threads: Some(2),
        ..CalibrationConfig::default()
    };
    let out = run_calibration(
        &images,
        BoardSpec::default(),
        DetectionConfig::default(),
        &cfg,
        &AtomicBool::new(false),
    )
    .expect("calibrated");

    assert!(out.success);
    // Clean renders never trip the outlier loop.
    assert!(out.removed.is_empty(), "removed {}", out.removed.len());
    assert_eq!(out.iterations, 0);
    assert_eq!(out.kept.len(), 4);
    assert_eq!(out.all.len(), 5);
    assert!(!out.all[4].success);
    assert!(out.metrics.rms < 0.5, "rms {}", out.metrics.rms);
    assert!((out.camera.fx - FOCAL).abs() < 0.03 * FOCAL, "fx {}", out.camera.fx);
    assert!((out.camera.fy - FOCAL).abs() < 0.03 * FOCAL, "fy {}", out.camera.fy);
    for det in &out.kept {
        let pose = det.pose.expect("pose");
        assert!((600.0..850.0).contains(&pose.translation.z), "{:?}", pose.translation);
    }

    let report = CalibrationReport::from_output(&out);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "blank.png");
    assert_eq!(report.kept.len(), 4);
}

#[test]
fn mostly_blank_batch_is_rejected() {
    let mut images: Vec<NamedImage> = views().into_iter().take(2).collect();
    images.push(NamedImage::new("blank.png", GrayImage::filled(WIDTH, HEIGHT, 0)));
    let err = run_calibration(
        &images,
        BoardSpec::default(),
        DetectionConfig::default(),
        &CalibrationConfig::default(),
        &AtomicBool::new(false),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::NotEnoughDetections { found: 2, required: 3 }
    ));
}
