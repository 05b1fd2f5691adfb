//! Calibration and run configuration.

use crate::camera::DistortionModel;
use crate::error::CalibrationError;
use crate::solver::SolverOptions;
use dotboard_detect::{BoardSpec, DetectionConfig};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Fewest detections a calibration may run on.
pub const MIN_CALIBRATION_SAMPLES: usize = 3;

/// Outlier loop and solver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Outlier rounds after the initial calibration.
    pub max_iterations: u32,
    /// Upper bound on the adaptive per-image mean error threshold, pixels.
    pub max_mean_error: f64,
    /// Any point error above this drops the image, pixels.
    pub max_point_error: f64,
    /// Rounds stop before the kept set would shrink below this.
    pub min_samples: usize,
    /// Multiplier on the MAD of per-image mean errors.
    pub mad_scale: f64,
    pub distortion_model: DistortionModel,
    /// Focal length used when the views cannot determine one, pixels.
    pub initial_focal: f64,
    pub solver: SolverOptions,
    /// Detection worker count; `None` uses every core.
    pub threads: Option<usize>,
    /// Residual heatmap grid over the image.
    pub heatmap_cols: usize,
    pub heatmap_rows: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_mean_error: 2.0,
            max_point_error: 5.0,
            min_samples: MIN_CALIBRATION_SAMPLES,
            mad_scale: 3.5,
            distortion_model: DistortionModel::default(),
            initial_focal: 2000.0,
            solver: SolverOptions::default(),
            threads: None,
            heatmap_cols: 8,
            heatmap_rows: 6,
        }
    }
}

impl CalibrationConfig {
    /// Minimum sample count actually enforced.
    pub fn effective_min_samples(&self) -> usize {
        self.min_samples.max(MIN_CALIBRATION_SAMPLES)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dotboard-output")
}

/// Everything one batch run needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub board: BoardSpec,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: default_output_dir(),
            board: BoardSpec::default(),
            detection: DetectionConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Path of the JSON report inside the output directory.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("calibration_report.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"input_dir": "shots", "calibration": {"max_iterations": 2}}"#,
        )
        .expect("parse");
        assert_eq!(cfg.input_dir, PathBuf::from("shots"));
        assert_eq!(cfg.output_dir, default_output_dir());
        assert_eq!(cfg.calibration.max_iterations, 2);
        assert_eq!(cfg.calibration.max_mean_error, 2.0);
        assert_eq!(cfg.board, BoardSpec::default());
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.json");
        let mut cfg = RunConfig::default();
        cfg.calibration.distortion_model = DistortionModel::Rational8;
        cfg.write_json(&path).expect("write");
        let back = RunConfig::load_json(&path).expect("load");
        assert_eq!(back.calibration, cfg.calibration);
    }

    #[test]
    fn min_samples_never_below_three() {
        let cfg = CalibrationConfig {
            min_samples: 1,
            ..CalibrationConfig::default()
        };
        assert_eq!(cfg.effective_min_samples(), 3);
    }
}
