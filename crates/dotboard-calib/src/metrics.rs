//! Summary statistics over the kept detections.

use dotboard_core::{max, mean, median, percentile, rms, std_dev};
use dotboard_detect::DetectionResult;
use serde::{Deserialize, Serialize};

/// Aggregate reprojection and camera-space error of a calibration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetrics {
    pub total_images: usize,
    pub successful_detections: usize,
    pub kept_samples: usize,
    pub removed_samples: usize,
    /// Solver RMS over all kept points, pixels.
    pub rms: f64,
    pub mean_error: f64,
    pub median_error: f64,
    pub p95_error: f64,
    pub max_error: f64,
    pub std_error: f64,
    /// Per-axis mean absolute camera-space residual, mm.
    pub mean_abs_mm: [f64; 3],
    pub rms_mm: [f64; 3],
    pub mean_abs_percent: [f64; 3],
    pub rms_percent: [f64; 3],
    /// Mean board translation, mm.
    pub translation_mean: [f64; 3],
    pub translation_std: [f64; 3],
}

impl CalibrationMetrics {
    pub fn from_detections(
        all: &[DetectionResult],
        kept: &[DetectionResult],
        solver_rms: f64,
    ) -> Self {
        let magnitudes: Vec<f64> = kept
            .iter()
            .filter_map(|d| d.residuals.as_ref())
            .flat_map(|r| r.magnitude.iter().copied())
            .collect();

        let mut m = Self {
            total_images: all.len(),
            successful_detections: all.iter().filter(|d| d.success).count(),
            kept_samples: kept.len(),
            removed_samples: all.iter().filter(|d| d.iteration_removed > 0).count(),
            rms: solver_rms,
            mean_error: mean(&magnitudes).unwrap_or(0.0),
            median_error: median(&magnitudes).unwrap_or(0.0),
            p95_error: percentile(&magnitudes, 0.95).unwrap_or(0.0),
            max_error: max(&magnitudes).unwrap_or(0.0),
            std_error: std_dev(&magnitudes).unwrap_or(0.0),
            ..Self::default()
        };

        for k in 0..3 {
            let mm: Vec<f64> = kept
                .iter()
                .filter_map(|d| d.residuals.as_ref())
                .flat_map(|r| r.camera_mm.iter().map(move |v| v[k]))
                .collect();
            let pct: Vec<f64> = kept
                .iter()
                .filter_map(|d| d.residuals.as_ref())
                .flat_map(|r| r.camera_percent.iter().map(move |v| v[k]))
                .collect();
            let trans: Vec<f64> = kept
                .iter()
                .filter_map(|d| d.pose.as_ref())
                .map(|p| p.translation[k])
                .collect();
            let abs = |v: &[f64]| v.iter().map(|x| x.abs()).collect::<Vec<_>>();
            m.mean_abs_mm[k] = mean(&abs(&mm)).unwrap_or(0.0);
            m.rms_mm[k] = rms(&mm).unwrap_or(0.0);
            m.mean_abs_percent[k] = mean(&abs(&pct)).unwrap_or(0.0);
            m.rms_percent[k] = rms(&pct).unwrap_or(0.0);
            m.translation_mean[k] = mean(&trans).unwrap_or(0.0);
            m.translation_std[k] = std_dev(&trans).unwrap_or(0.0);
        }
        m
    }
}

/// Mean residual magnitude over a coarse grid laid on the image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeatmapBundle {
    pub cols: usize,
    pub rows: usize,
    pub cell_width: f64,
    pub cell_height: f64,
    /// Row-major, `None` for cells no point fell into.
    pub mean_error: Vec<Option<f64>>,
    pub counts: Vec<usize>,
}

impl HeatmapBundle {
    pub fn from_detections(
        kept: &[DetectionResult],
        image_size: (usize, usize),
        cols: usize,
        rows: usize,
    ) -> Self {
        let (cols, rows) = (cols.max(1), rows.max(1));
        let cell_width = image_size.0.max(1) as f64 / cols as f64;
        let cell_height = image_size.1.max(1) as f64 / rows as f64;
        let mut sums = vec![0.0; cols * rows];
        let mut counts = vec![0usize; cols * rows];
        for det in kept {
            let Some(res) = det.residuals.as_ref() else {
                continue;
            };
            for (p, e) in det.image_points.iter().zip(&res.magnitude) {
                if !(p.x >= 0.0 && p.y >= 0.0) {
                    continue;
                }
                let (cx, cy) = ((p.x / cell_width) as usize, (p.y / cell_height) as usize);
                if cx >= cols || cy >= rows {
                    continue;
                }
                sums[cy * cols + cx] += e;
                counts[cy * cols + cx] += 1;
            }
        }
        let mean_error = sums
            .iter()
            .zip(&counts)
            .map(|(&s, &n)| (n > 0).then(|| s / n as f64))
            .collect();
        Self {
            cols,
            rows,
            cell_width,
            cell_height,
            mean_error,
            counts,
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.mean_error[row * self.cols + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotboard_detect::{BoardPose, DetectionResiduals};
    use nalgebra::{Matrix3, Point2, Vector2, Vector3};

    fn detection(points: &[(f64, f64)], errors: &[f64], tz: f64) -> DetectionResult {
        DetectionResult {
            success: true,
            image_points: points.iter().map(|&(x, y)| Point2::new(x, y)).collect(),
            residuals: Some(DetectionResiduals {
                pixel: errors.iter().map(|&e| Vector2::new(e, 0.0)).collect(),
                magnitude: errors.to_vec(),
                camera_mm: errors.iter().map(|&e| Vector3::new(-e, 0.0, 0.0)).collect(),
                camera_percent: errors.iter().map(|&e| Vector3::new(e, 0.0, 0.0)).collect(),
                ..DetectionResiduals::default()
            }),
            pose: Some(BoardPose {
                rotation_vector: Vector3::zeros(),
                rotation: Matrix3::identity(),
                translation: Vector3::new(0.0, 0.0, tz),
            }),
            ..DetectionResult::default()
        }
    }

    #[test]
    fn metrics_summarise_kept_points() {
        let kept = vec![
            detection(&[(10.0, 10.0), (20.0, 10.0)], &[1.0, 3.0], 400.0),
            detection(&[(10.0, 10.0)], &[2.0], 600.0),
        ];
        let mut removed = detection(&[(1.0, 1.0)], &[50.0], 100.0);
        removed.iteration_removed = 1;
        let mut all = kept.clone();
        all.push(removed);
        let m = CalibrationMetrics::from_detections(&all, &kept, 0.7);
        assert_eq!((m.total_images, m.kept_samples, m.removed_samples), (3, 2, 1));
        assert_eq!(m.mean_error, 2.0);
        assert_eq!(m.median_error, 2.0);
        assert_eq!(m.max_error, 3.0);
        assert_eq!(m.mean_abs_mm[0], 2.0);
        assert_eq!(m.translation_mean[2], 500.0);
        assert_eq!(m.translation_std[2], 100.0);
        assert_eq!(m.rms, 0.7);
    }

    #[test]
    fn heatmap_bins_by_position() {
        let kept = vec![detection(
            &[(5.0, 5.0), (15.0, 5.0), (6.0, 4.0), (99.0, 99.0)],
            &[1.0, 4.0, 3.0, 9.0],
            1.0,
        )];
        let h = HeatmapBundle::from_detections(&kept, (100, 100), 10, 10);
        assert_eq!(h.get(0, 0), Some(2.0));
        assert_eq!(h.get(1, 0), Some(4.0));
        assert_eq!(h.get(9, 9), Some(9.0));
        assert_eq!(h.get(5, 5), None);
        assert_eq!(h.counts.iter().sum::<usize>(), 4);
    }
}
