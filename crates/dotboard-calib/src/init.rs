//! Closed-form starting values: focal length from plane homographies and
//! board pose from a homography in normalized coordinates.

use crate::camera::CameraModel;
use dotboard_core::estimate_homography;
use nalgebra::{Matrix2, Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};

/// Board pose as a rotation vector and translation (object to camera).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub t: Vector3<f64>,
}

impl Pose {
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(self.rvec)
    }
}

/// Homography from the board plane (`z = 0`) to `image`.
pub fn plane_homography(object: &[Point3<f64>], image: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let src: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    estimate_homography(&src, image).map(|h| h.h)
}

/// Focal lengths from plane homographies with the principal point held at
/// `(cx, cy)`.
///
/// Each view contributes the two orthonormality constraints on the first
/// two rotation columns, linear in `1/fx^2` and `1/fy^2`. Returns `None`
/// when the views cannot determine the focal lengths (e.g. all fronto-parallel).
pub fn focal_from_homographies(
    homographies: &[Matrix3<f64>],
    cx: f64,
    cy: f64,
) -> Option<(f64, f64)> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let mut ata = Matrix2::zeros();
    let mut atb = Vector2::zeros();
    for h in homographies {
        let hc = shift * h;
        let norm = hc.norm();
        if norm <= 0.0 || !norm.is_finite() {
            continue;
        }
        let hc = hc / norm;
        let (h1, h2) = (hc.column(0), hc.column(1));
        let rows = [
            (Vector2::new(h1[0] * h2[0], h1[1] * h2[1]), -h1[2] * h2[2]),
            (
                Vector2::new(h1[0] * h1[0] - h2[0] * h2[0], h1[1] * h1[1] - h2[1] * h2[1]),
                -(h1[2] * h1[2] - h2[2] * h2[2]),
            ),
        ];
        for (a, b) in rows {
            ata += a * a.transpose();
            atb += a * b;
        }
    }
    let trace = ata.trace();
    if trace <= 0.0 || ata.determinant() <= 1e-12 * trace * trace {
        return None;
    }
    let x = ata.lu().solve(&atb)?;
    if !(x[0] > 0.0 && x[1] > 0.0) {
        return None;
    }
    let (fx, fy) = (x[0].sqrt().recip(), x[1].sqrt().recip());
    (fx.is_finite() && fy.is_finite()).then_some((fx, fy))
}

/// Pose of a planar board from a homography mapping the board plane to
/// undistorted normalized image coordinates.
pub fn pose_from_normalized_homography(h: &Matrix3<f64>) -> Option<Pose> {
    let (h1, h2, h3) = (
        h.column(0).into_owned(),
        h.column(1).into_owned(),
        h.column(2).into_owned(),
    );
    let scale = 0.5 * (h1.norm() + h2.norm());
    if scale <= 1e-15 || !scale.is_finite() {
        return None;
    }
    // The board must lie in front of the camera.
    let lambda = if h3.z >= 0.0 { 1.0 / scale } else { -1.0 / scale };
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let svd = Matrix3::from_columns(&[r1, r2, r3]).svd(true, true);
    let (mut u, v_t) = (svd.u?, svd.v_t?);
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r = Rotation3::from_matrix_unchecked(u * v_t);
    Some(Pose {
        rvec: r.scaled_axis(),
        t: h3 * lambda,
    })
}

/// Pose of one view under `camera`, distortion included.
pub fn estimate_pose(
    camera: &CameraModel,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<Pose> {
    let normalized: Vec<Point2<f64>> = image.iter().map(|&p| camera.undistort_point(p)).collect();
    let h = plane_homography(object, &normalized)?;
    pose_from_normalized_homography(&h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Vec<Point3<f64>> {
        (0..7)
            .flat_map(|r| (0..6).map(move |c| Point3::new(c as f64 * 25.0, r as f64 * 25.0, 0.0)))
            .collect()
    }

    fn project(cam: &CameraModel, pose: &Pose, pts: &[Point3<f64>]) -> Vec<Point2<f64>> {
        pts.iter()
            .map(|p| cam.project_posed(&pose.rvec, &pose.t, p).expect("visible"))
            .collect()
    }

    fn poses() -> Vec<Pose> {
        vec![
            Pose {
                rvec: Vector3::new(0.3, -0.2, 0.1),
                t: Vector3::new(-60.0, -70.0, 500.0),
            },
            Pose {
                rvec: Vector3::new(-0.25, 0.3, -0.05),
                t: Vector3::new(-80.0, -40.0, 600.0),
            },
            Pose {
                rvec: Vector3::new(0.1, 0.35, 0.2),
                t: Vector3::new(-50.0, -90.0, 550.0),
            },
        ]
    }

    #[test]
    fn focal_lengths_from_tilted_views() {
        let cam = CameraModel::pinhole(1000.0, 990.0, 640.0, 480.0);
        let pts = grid();
        let hs: Vec<Matrix3<f64>> = poses()
            .iter()
            .map(|p| plane_homography(&pts, &project(&cam, p, &pts)).expect("homography"))
            .collect();
        let (fx, fy) = focal_from_homographies(&hs, 640.0, 480.0).expect("focal");
        assert_relative_eq!(fx, 1000.0, max_relative = 1e-6);
        assert_relative_eq!(fy, 990.0, max_relative = 1e-6);
    }

    #[test]
    fn fronto_parallel_views_do_not_fix_focal() {
        let cam = CameraModel::pinhole(1000.0, 1000.0, 640.0, 480.0);
        let pts = grid();
        let pose = Pose {
            rvec: Vector3::zeros(),
            t: Vector3::new(-60.0, -70.0, 500.0),
        };
        let h = plane_homography(&pts, &project(&cam, &pose, &pts)).expect("homography");
        assert!(focal_from_homographies(&[h, h], 640.0, 480.0).is_none());
    }

    #[test]
    fn pose_recovered_from_projection() {
        let cam = CameraModel::pinhole(1000.0, 990.0, 640.0, 480.0);
        let pts = grid();
        for truth in poses() {
            let est = estimate_pose(&cam, &pts, &project(&cam, &truth, &pts)).expect("pose");
            assert_relative_eq!(est.rvec, truth.rvec, epsilon = 1e-6);
            assert_relative_eq!(est.t, truth.t, epsilon = 1e-4);
        }
    }
}
