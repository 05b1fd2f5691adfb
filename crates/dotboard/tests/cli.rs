use assert_cmd::Command;
use dotboard::core::GrayImage;
use dotboard::detect::synthetic::{pose_homography, SyntheticBoard};
use dotboard::BoardSpec;
use nalgebra::{Matrix3, Rotation3, Vector3};
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn dotboard() -> Command {
    Command::cargo_bin("dotboard").expect("binary built")
}

fn save_png(img: &GrayImage, path: &Path) {
    image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .expect("buffer size")
        .save(path)
        .expect("png written");
}

fn rendered_view(euler: (f64, f64, f64)) -> GrayImage {
    let spec = BoardSpec::default();
    let k = Matrix3::new(1200.0, 0.0, 480.0, 0.0, 1200.0, 400.0, 0.0, 0.0, 1.0);
    let flip = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
    let r = Rotation3::from_euler_angles(euler.0, euler.1, euler.2).into_inner() * flip;
    let t = Vector3::new(0.0, 0.0, 700.0) - r * Vector3::new(56.0, 81.0, 0.0);
    SyntheticBoard::new(spec).render(960, 800, &pose_homography(&spec, &k, &r, &t))
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    dotboard().assert().code(1);
}

#[test]
fn help_exits_cleanly() {
    dotboard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("calibrate"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    dotboard().args(["calibrate", "--bogus"]).assert().code(1);
}

#[test]
fn missing_input_directory_is_a_usage_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    dotboard()
        .args(["calibrate", "--input"])
        .arg(tmp.path().join("nope"))
        .arg("--output")
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn invalid_board_is_a_usage_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    dotboard()
        .args(["calibrate", "--diameter", "30", "--spacing", "20", "--input"])
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid board"));
}

#[test]
fn empty_directory_fails_calibration() {
    let tmp = tempfile::tempdir().expect("tempdir");
    dotboard()
        .args(["calibrate", "--input"])
        .arg(tmp.path())
        .arg("--output")
        .arg(tmp.path().join("out"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no images found"));
}

#[test]
fn blank_images_fail_calibration_without_a_report() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let input = tmp.path().join("in");
    fs::create_dir(&input).expect("mkdir");
    for (i, v) in [0u8, 128, 255].into_iter().enumerate() {
        save_png(&GrayImage::filled(200, 160, v), &input.join(format!("blank_{i}.png")));
    }
    let out = tmp.path().join("out");
    dotboard()
        .args(["calibrate", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&out)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not enough valid detections"));
    assert!(!out.join("calibration_report.json").exists());
}

#[test]
fn detect_prints_json_and_reports_failure() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("white.png");
    save_png(&GrayImage::filled(320, 240, 255), &path);
    dotboard()
        .arg("detect")
        .arg("--image")
        .arg(&path)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"success\": false"))
        .stderr(predicate::str::contains("board boundary"));
}

#[test]
fn calibrates_rendered_views_and_writes_report() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let input = tmp.path().join("in");
    fs::create_dir(&input).expect("mkdir");
    let views = [
        (0.25, -0.2, 0.05),
        (-0.25, 0.2, -0.05),
        (0.2, 0.25, 0.1),
        (-0.2, -0.25, 0.0),
    ];
    for (i, e) in views.into_iter().enumerate() {
        save_png(&rendered_view(e), &input.join(format!("view_{i}.png")));
    }
    let config = tmp.path().join("run.json");
    fs::write(&config, r#"{"calibration": {"distortion_model": "brown5"}}"#).expect("config");
    let out = tmp.path().join("out");

    dotboard()
        .args(["calibrate", "--max-iterations", "0", "--threads", "2", "--config"])
        .arg(&config)
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("calibration succeeded"));

    let raw = fs::read_to_string(out.join("calibration_report.json")).expect("report");
    let report: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(report["success"], true);
    assert_eq!(report["kept"].as_array().map(Vec::len), Some(4));
    let fx = report["camera_matrix"][0][0].as_f64().expect("fx");
    assert!((fx - 1200.0).abs() < 36.0, "fx {fx}");
}
