//! Per-point residuals of a calibrated view, in pixels and on the board
//! plane in camera coordinates.

use crate::camera::CameraModel;
use crate::init::Pose;
use dotboard_core::{max, mean, rms};
use dotboard_detect::{BoardPose, DetectionResiduals};
use log::debug;
use nalgebra::{Point2, Point3, Vector2, Vector3};

/// Percent residuals are taken relative to at least this many millimetres.
const PERCENT_FLOOR_MM: f64 = 5.0;

pub fn board_pose(pose: &Pose) -> BoardPose {
    BoardPose {
        rotation_vector: pose.rvec,
        rotation: pose.rotation().into_inner(),
        translation: pose.t,
    }
}

/// Intersect the viewing ray of `pixel` with the board plane of `pose`.
fn back_project_to_plane(camera: &CameraModel, pose: &Pose, pixel: Point2<f64>) -> Option<Vector3<f64>> {
    let normal = pose.rotation().into_inner().column(2).into_owned();
    let offset = normal.dot(&pose.t);
    let n = camera.undistort_point(pixel);
    let ray = Vector3::new(n.x, n.y, 1.0);
    let denom = normal.dot(&ray);
    if denom.abs() < 1e-12 {
        return None;
    }
    let s = offset / denom;
    (s.is_finite() && s > 0.0).then_some(ray * s)
}

/// Residuals of one view under `camera` and `pose`.
///
/// Pixel residuals are observed minus reprojected. Camera-space residuals
/// are the observed point back-projected onto the fitted board plane minus
/// the expected board point, per axis.
pub fn compute_residuals(
    camera: &CameraModel,
    pose: &Pose,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> DetectionResiduals {
    let rot = pose.rotation();
    let mut out = DetectionResiduals::default();
    for (obj, img) in object.iter().zip(image) {
        let pixel = match camera.project_posed(&pose.rvec, &pose.t, obj) {
            Some(p) => img - p,
            None => Vector2::repeat(f64::MAX.sqrt()),
        };
        out.magnitude.push(pixel.norm());
        out.pixel.push(pixel);

        let expected = (rot * obj).coords + pose.t;
        let mm = match back_project_to_plane(camera, pose, *img) {
            Some(observed) => observed - expected,
            None => {
                debug!("ray parallel to board plane at {img:?}");
                Vector3::zeros()
            }
        };
        let percent = mm.zip_map(&expected, |r, e| 100.0 * r / e.abs().max(PERCENT_FLOOR_MM));
        out.camera_mm.push(mm);
        out.camera_percent.push(percent);
    }
    out.mean_error = mean(&out.magnitude).unwrap_or(0.0);
    out.max_error = max(&out.magnitude).unwrap_or(0.0);
    out.rms_error = rms(&out.magnitude).unwrap_or(0.0);
    out
}
