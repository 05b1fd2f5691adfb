//! Synthetic board images for tests and demos.
//!
//! The board is drawn in its printed frame (millimetres, y down, origin at
//! small dot `(0, 0)`) and mapped into the image through a homography. Each
//! pixel is supersampled so dot edges are anti-aliased.

use crate::board::{BoardSpec, GRID_COLS, GRID_ROWS, MISSING_COL, MISSING_ROW};
use dotboard_core::{point_in_polygon, GrayImage, Homography};
use nalgebra::{Matrix3, Point2, Vector3};

/// Rendering parameters.
#[derive(Clone, Debug)]
pub struct SyntheticBoard {
    pub spec: BoardSpec,
    pub paper: u8,
    pub ink: u8,
    pub background: u8,
    /// Samples per pixel side.
    pub supersample: usize,
}

impl SyntheticBoard {
    pub fn new(spec: BoardSpec) -> Self {
        Self {
            spec,
            paper: 235,
            ink: 25,
            background: 70,
            supersample: 3,
        }
    }

    /// Intensity of the printed board at a point of the printed frame, or
    /// `None` outside the paper.
    fn shade(
        &self,
        p: Point2<f64>,
        outline: &[Point2<f64>; 4],
        large: &[Point2<f64>; 4],
    ) -> Option<u8> {
        if !point_in_polygon(p, outline) {
            return None;
        }
        let s = self.spec.spacing_mm;
        let r_small = 0.5 * self.spec.small_diameter_mm;
        let r_large = 0.5 * self.spec.large_diameter_mm();

        let col = (p.x / s).round();
        let row = (p.y / s).round();
        let on_grid = (0.0..GRID_COLS as f64).contains(&col)
            && (0.0..GRID_ROWS as f64).contains(&row)
            && !(row as usize == MISSING_ROW && col as usize == MISSING_COL);
        if on_grid && (p - Point2::new(col * s, row * s)).norm() <= r_small {
            return Some(self.ink);
        }
        if large.iter().any(|c| (p - c).norm() <= r_large) {
            return Some(self.ink);
        }
        Some(self.paper)
    }

    /// Render the board through `img_from_printed`.
    pub fn render(&self, width: usize, height: usize, img_from_printed: &Homography) -> GrayImage {
        let mut out = GrayImage::filled(width, height, self.background);
        let Some(printed_from_img) = img_from_printed.inverse() else {
            return out;
        };
        let outline = self.spec.printed_outline();
        let large = self.spec.printed_large_centers();
        let n = self.supersample.max(1);
        let step = 1.0 / n as f64;

        for y in 0..height {
            for x in 0..width {
                let mut acc = 0u32;
                for sy in 0..n {
                    for sx in 0..n {
                        let q = Point2::new(
                            x as f64 - 0.5 + (sx as f64 + 0.5) * step,
                            y as f64 - 0.5 + (sy as f64 + 0.5) * step,
                        );
                        let p = printed_from_img.apply(q);
                        acc += self
                            .shade(p, &outline, &large)
                            .unwrap_or(self.background) as u32;
                    }
                }
                out.set(x, y, (acc as f64 / (n * n) as f64).round() as u8);
            }
        }
        out
    }

    /// Small-dot centers in the image, in logical order.
    pub fn image_points(&self, img_from_printed: &Homography) -> Vec<Point2<f64>> {
        BoardSpec::logical_indices()
            .into_iter()
            .map(|idx| img_from_printed.apply(self.spec.printed_small_center(idx)))
            .collect()
    }
}

/// Homography placing the printed board centered in a `width x height`
/// image at `px_per_mm`, rotated by `angle` radians.
pub fn centered_homography(
    spec: &BoardSpec,
    width: usize,
    height: usize,
    px_per_mm: f64,
    angle: f64,
) -> Homography {
    let outline = spec.printed_outline();
    let cx = 0.5 * (outline[0].x + outline[2].x);
    let cy = 0.5 * (outline[0].y + outline[2].y);
    let (sin, cos) = angle.sin_cos();
    let k = px_per_mm;
    let tx = 0.5 * width as f64 - k * (cos * cx - sin * cy);
    let ty = 0.5 * height as f64 - k * (sin * cx + cos * cy);
    Homography::new(Matrix3::new(
        k * cos,
        -k * sin,
        tx,
        k * sin,
        k * cos,
        ty,
        0.0,
        0.0,
        1.0,
    ))
}

/// Homography from the printed frame into an undistorted pinhole image for
/// a board at pose `(rotation, translation)` in object coordinates.
///
/// Object coordinates put row 6 at `y = 0` with y up, so the printed frame
/// is flipped before the pose is applied.
pub fn pose_homography(
    spec: &BoardSpec,
    camera: &Matrix3<f64>,
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> Homography {
    let span = (GRID_ROWS as f64 - 1.0) * spec.spacing_mm;
    let object_from_printed = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, span, 0.0, 0.0, 1.0);
    let plane = Matrix3::from_columns(&[
        rotation.column(0).into_owned(),
        rotation.column(1).into_owned(),
        *translation,
    ]);
    Homography::new(camera * plane * object_from_printed)
}
