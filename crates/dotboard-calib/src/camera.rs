//! Pinhole camera with the rational, thin-prism and tilted-sensor
//! distortion terms, coefficients in the usual 14-term order
//! `k1 k2 p1 p2 k3 k4 k5 k6 s1 s2 s3 s4 tau_x tau_y`.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

pub const DISTORTION_COEFFS: usize = 14;

/// Which distortion coefficients calibration may estimate. The rest stay zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionModel {
    /// `k1 k2 p1 p2 k3`.
    Brown5,
    /// Adds the rational denominator `k4 k5 k6`.
    Rational8,
    /// Adds thin-prism `s1..s4`.
    RationalThinPrism12,
    /// Adds the sensor tilt `tau_x tau_y`.
    #[default]
    Full14,
}

impl DistortionModel {
    /// Number of leading coefficients the model uses.
    pub fn len(self) -> usize {
        match self {
            Self::Brown5 => 5,
            Self::Rational8 => 8,
            Self::RationalThinPrism12 => 12,
            Self::Full14 => DISTORTION_COEFFS,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// Tilted-sensor projection for `tau_x`, `tau_y`.
fn tilt_matrix(tau_x: f64, tau_y: f64) -> Matrix3<f64> {
    let (sx, cx) = tau_x.sin_cos();
    let (sy, cy) = tau_y.sin_cos();
    let rot_x = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, sx, 0.0, -sx, cx);
    let rot_y = Matrix3::new(cy, 0.0, -sy, 0.0, 1.0, 0.0, sy, 0.0, cy);
    let rot_xy = rot_y * rot_x;
    let proj_z = Matrix3::new(
        rot_xy[(2, 2)],
        0.0,
        -rot_xy[(0, 2)],
        0.0,
        rot_xy[(2, 2)],
        -rot_xy[(1, 2)],
        0.0,
        0.0,
        1.0,
    );
    proj_z * rot_xy
}

/// Intrinsics and distortion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: [f64; DISTORTION_COEFFS],
    pub model: DistortionModel,
}

impl CameraModel {
    /// Distortion-free camera.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: [0.0; DISTORTION_COEFFS],
            model: DistortionModel::default(),
        }
    }

    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn camera_matrix_rows(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Zero every coefficient outside the active model.
    pub fn clamp_to_model(&mut self) {
        let n = self.model.len();
        for c in self.distortion.iter_mut().skip(n) {
            *c = 0.0;
        }
    }

    /// Apply distortion to a normalized image point.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let [k1, k2, p1, p2, k3, k4, k5, k6, s1, s2, s3, s4, tau_x, tau_y] = self.distortion;
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xy = x * y;
        let xd = x * radial + 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x) + s1 * r2 + s2 * r4;
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy + s3 * r2 + s4 * r4;
        if tau_x == 0.0 && tau_y == 0.0 {
            return Point2::new(xd, yd);
        }
        let v = tilt_matrix(tau_x, tau_y) * Vector3::new(xd, yd, 1.0);
        let w = if v.z != 0.0 { 1.0 / v.z } else { 1.0 };
        Point2::new(v.x * w, v.y * w)
    }

    /// Normalized point to pixels.
    #[inline]
    pub fn to_pixel(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    /// Project a camera-frame point; `None` behind the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        Some(self.to_pixel(self.distort(Point2::new(p.x / p.z, p.y / p.z))))
    }

    /// Project an object point seen at pose `(rvec, t)`.
    pub fn project_posed(
        &self,
        rvec: &Vector3<f64>,
        t: &Vector3<f64>,
        object: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        let cam = Rotation3::from_scaled_axis(*rvec) * object + t;
        self.project(&cam)
    }

    /// Undistorted normalized coordinates of a pixel, by fixed-point iteration.
    pub fn undistort_point(&self, pixel: Point2<f64>) -> Point2<f64> {
        let target = Point2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy);
        if self.distortion.iter().all(|&c| c == 0.0) {
            return target;
        }
        let mut p = target;
        for _ in 0..30 {
            let d = self.distort(p);
            let err = target - d;
            p += err;
            if err.norm() < 1e-14 {
                break;
            }
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn distorted_camera() -> CameraModel {
        let mut cam = CameraModel::pinhole(900.0, 880.0, 320.0, 240.0);
        cam.distortion[0] = -0.12;
        cam.distortion[1] = 0.05;
        cam.distortion[2] = 0.001;
        cam.distortion[3] = -0.0008;
        cam.distortion[5] = 0.01;
        cam.distortion[8] = 0.0005;
        cam.distortion[12] = 0.002;
        cam
    }

    #[test]
    fn pinhole_projection() {
        let cam = CameraModel::pinhole(800.0, 800.0, 320.0, 240.0);
        let p = cam.project(&Point3::new(0.1, -0.05, 2.0)).expect("in front");
        assert_relative_eq!(p, Point2::new(360.0, 220.0), epsilon = 1e-12);
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn undistort_inverts_distort() {
        let cam = distorted_camera();
        for n in [Point2::new(0.2, -0.1), Point2::new(-0.3, 0.25), Point2::new(0.0, 0.0)] {
            let px = cam.to_pixel(cam.distort(n));
            assert_relative_eq!(cam.undistort_point(px), n, epsilon = 1e-9);
        }
    }

    #[test]
    fn zero_tilt_is_identity() {
        assert_relative_eq!(tilt_matrix(0.0, 0.0), Matrix3::identity(), epsilon = 1e-15);
    }

    #[test]
    fn model_limits_coefficients() {
        let mut cam = distorted_camera();
        cam.model = DistortionModel::Brown5;
        cam.clamp_to_model();
        assert!(cam.distortion[5..].iter().all(|&c| c == 0.0));
        assert_eq!(cam.distortion[0], -0.12);
    }
}
