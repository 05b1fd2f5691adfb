use crate::board::LogicalIndex;
use crate::boundary::BoardQuad;
use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-point residuals attached by calibration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResiduals {
    /// Observed minus reprojected, in pixels.
    pub pixel: Vec<Vector2<f64>>,
    pub magnitude: Vec<f64>,
    /// Back-projected minus expected board point in the camera frame.
    pub camera_mm: Vec<Vector3<f64>>,
    pub camera_percent: Vec<Vector3<f64>>,
    pub mean_error: f64,
    pub max_error: f64,
    pub rms_error: f64,
}

/// Board pose in the camera frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardPose {
    pub rotation_vector: Vector3<f64>,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Outcome of detecting the board in one image.
///
/// Successful results carry one image point, object point and logical index
/// per small dot, all in the same `(row, col)` order. Calibration later
/// fills `residuals`, `pose` and `iteration_removed`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub name: String,
    pub success: bool,
    pub message: String,
    pub elapsed_ms: f64,
    /// `(width, height)` of the input image.
    pub image_size: (usize, usize),
    pub image_points: Vec<Point2<f64>>,
    pub object_points: Vec<Point3<f64>>,
    /// Small-dot radii in input pixels.
    pub point_radii: Vec<f64>,
    pub big_circle_points: Vec<Point2<f64>>,
    pub big_circle_radii: Vec<f64>,
    pub logical_indices: Vec<LogicalIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_quad: Option<BoardQuad>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residuals: Option<DetectionResiduals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<BoardPose>,
    /// 0 while kept; otherwise the outlier round that removed it.
    pub iteration_removed: u32,
}

impl DetectionResult {
    pub fn failure(name: &str, image_size: (usize, usize), message: String) -> Self {
        Self {
            name: name.to_string(),
            image_size,
            message,
            ..Self::default()
        }
    }

    pub fn is_kept(&self) -> bool {
        self.success && self.iteration_removed == 0
    }

    /// Mean residual in pixels, once calibration has run.
    pub fn mean_error(&self) -> Option<f64> {
        self.residuals.as_ref().map(|r| r.mean_error)
    }

    pub fn max_error(&self) -> Option<f64> {
        self.residuals.as_ref().map(|r| r.max_error)
    }

    /// Remove the debug directory, if one was written.
    pub fn cleanup_debug_dir(&mut self) -> std::io::Result<()> {
        match self.debug_dir.take() {
            Some(dir) if dir.exists() => std::fs::remove_dir_all(dir),
            _ => Ok(()),
        }
    }
}
