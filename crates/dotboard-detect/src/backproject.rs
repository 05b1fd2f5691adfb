//! Mapping rectified-frame dots back into the input image.

use crate::error::DetectionError;
use dotboard_core::Homography;
use nalgebra::Point2;

/// Dot centers and radii in input-image pixels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageDots {
    pub points: Vec<Point2<f64>>,
    pub radii: Vec<f64>,
}

/// Map centers through `h_img_from_rect`; radii scale with the local area
/// change of the homography at each center.
pub fn back_project(
    h_img_from_rect: &Homography,
    centers: &[Point2<f64>],
    radii: &[f64],
) -> Result<ImageDots, DetectionError> {
    if centers.len() != radii.len() {
        return Err(DetectionError::BackProjection(format!(
            "{} centers but {} radii",
            centers.len(),
            radii.len()
        )));
    }
    let mut out = ImageDots {
        points: Vec::with_capacity(centers.len()),
        radii: Vec::with_capacity(radii.len()),
    };
    for (&c, &r) in centers.iter().zip(radii) {
        let p = h_img_from_rect.apply(c);
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(DetectionError::BackProjection(format!(
                "rectified point ({:.1}, {:.1}) maps to infinity",
                c.x, c.y
            )));
        }
        out.points.push(p);
        out.radii.push(r * h_img_from_rect.local_scale(c));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    #[test]
    fn scales_radii_with_the_mapping() {
        let h = Homography::new(Matrix3::new(0.5, 0.0, 10.0, 0.0, 0.5, 20.0, 0.0, 0.0, 1.0));
        let dots = back_project(&h, &[Point2::new(100.0, 40.0)], &[8.0]).expect("mapped");
        assert_relative_eq!(dots.points[0], Point2::new(60.0, 40.0), epsilon = 1e-12);
        assert_relative_eq!(dots.radii[0], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn points_at_infinity_fail() {
        let h = Homography::new(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -5.0));
        let err = back_project(&h, &[Point2::new(5.0, 1.0)], &[1.0]).unwrap_err();
        assert_eq!(err.stage(), "back-projection");
    }

    #[test]
    fn length_mismatch_fails() {
        assert!(back_project(&Homography::identity(), &[Point2::origin()], &[]).is_err());
    }
}
