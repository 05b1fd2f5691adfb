//! Persisted JSON report of a calibration run.

use crate::calibrate::CalibrationOutput;
use crate::camera::{DistortionModel, DISTORTION_COEFFS};
use crate::error::CalibrationError;
use crate::metrics::{CalibrationMetrics, HeatmapBundle};
use dotboard_detect::DetectionResult;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// One calibrated image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleReport {
    pub name: String,
    pub mean_error: f64,
    pub max_error: f64,
    /// Board translation in the camera frame, mm.
    pub translation: [f64; 3],
    /// Board rotation as a rotation vector, radians.
    pub rotation: [f64; 3],
    pub iteration_removed: u32,
}

impl SampleReport {
    fn from_detection(d: &DetectionResult) -> Self {
        let (translation, rotation) = d
            .pose
            .as_ref()
            .map(|p| (p.translation.into(), p.rotation_vector.into()))
            .unwrap_or(([0.0; 3], [0.0; 3]));
        Self {
            name: d.name.clone(),
            mean_error: d.mean_error().unwrap_or(0.0),
            max_error: d.max_error().unwrap_or(0.0),
            translation,
            rotation,
            iteration_removed: d.iteration_removed,
        }
    }
}

/// An image the board was not found in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedSample {
    pub name: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub success: bool,
    pub message: String,
    pub image_size: [usize; 2],
    pub iterations: u32,
    #[serde(flatten)]
    pub metrics: CalibrationMetrics,
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion_model: DistortionModel,
    /// `k1 k2 p1 p2 k3 k4 k5 k6 s1 s2 s3 s4 tau_x tau_y`.
    pub distortion_coefficients: [f64; DISTORTION_COEFFS],
    pub kept: Vec<SampleReport>,
    pub removed: Vec<SampleReport>,
    pub failed: Vec<FailedSample>,
    pub heatmap: HeatmapBundle,
}

impl CalibrationReport {
    pub fn from_output(out: &CalibrationOutput) -> Self {
        Self {
            success: out.success,
            message: out.message.clone(),
            image_size: [out.image_size.0, out.image_size.1],
            iterations: out.iterations,
            metrics: out.metrics.clone(),
            camera_matrix: out.camera.camera_matrix_rows(),
            distortion_model: out.camera.model,
            distortion_coefficients: out.camera.distortion,
            kept: out.kept.iter().map(SampleReport::from_detection).collect(),
            removed: out.removed.iter().map(SampleReport::from_detection).collect(),
            failed: out
                .all
                .iter()
                .filter(|d| !d.success)
                .map(|d| FailedSample {
                    name: d.name.clone(),
                    message: d.message.clone(),
                })
                .collect(),
            heatmap: out.heatmap.clone(),
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        format!(
            "calibration succeeded: rms {:.4} px over {} images ({} removed, {} failed); fx {:.2} fy {:.2} cx {:.2} cy {:.2}",
            self.metrics.rms,
            self.metrics.kept_samples,
            self.metrics.removed_samples,
            self.failed.len(),
            self.camera_matrix[0][0],
            self.camera_matrix[1][1],
            self.camera_matrix[0][2],
            self.camera_matrix[1][2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraModel;
    use dotboard_detect::{BoardPose, DetectionResiduals};
    use nalgebra::{Matrix3, Vector3};

    fn output() -> CalibrationOutput {
        let kept = DetectionResult {
            name: "a.png".into(),
            success: true,
            residuals: Some(DetectionResiduals {
                mean_error: 0.2,
                max_error: 0.5,
                ..DetectionResiduals::default()
            }),
            pose: Some(BoardPose {
                rotation_vector: Vector3::new(0.1, 0.2, 0.3),
                rotation: Matrix3::identity(),
                translation: Vector3::new(1.0, 2.0, 500.0),
            }),
            ..DetectionResult::default()
        };
        let removed = DetectionResult {
            name: "b.png".into(),
            success: true,
            iteration_removed: 2,
            ..kept.clone()
        };
        let failed = DetectionResult::failure("c.png", (640, 480), "blobs: expected 41".into());
        CalibrationOutput {
            success: true,
            message: "ok".into(),
            camera: CameraModel::pinhole(1000.0, 990.0, 320.0, 240.0),
            image_size: (640, 480),
            all: vec![kept.clone(), removed.clone(), failed],
            kept: vec![kept],
            removed: vec![removed],
            metrics: CalibrationMetrics {
                rms: 0.25,
                kept_samples: 1,
                removed_samples: 1,
                ..CalibrationMetrics::default()
            },
            heatmap: HeatmapBundle::default(),
            iterations: 2,
        }
    }

    #[test]
    fn report_lists_samples_and_failures() {
        let report = CalibrationReport::from_output(&output());
        assert_eq!(report.kept.len(), 1);
        assert_eq!(report.kept[0].translation, [1.0, 2.0, 500.0]);
        assert_eq!(report.removed[0].iteration_removed, 2);
        assert_eq!(report.failed[0].name, "c.png");
        assert_eq!(report.camera_matrix[0], [1000.0, 0.0, 320.0]);
        assert!(report.summary().contains("rms 0.2500 px"));
    }

    #[test]
    fn json_is_flat_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/report.json");
        let report = CalibrationReport::from_output(&output());
        report.write_json(&path).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["rms"], 0.25);
        assert_eq!(value["camera_matrix"][1][1], 990.0);
        assert_eq!(value["distortion_coefficients"].as_array().map(Vec::len), Some(14));
        assert_eq!(CalibrationReport::load_json(&path).expect("load"), report);
    }
}
