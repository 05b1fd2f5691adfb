//! Perspective rectification of the located board.

use crate::config::WarpParams;
use crate::error::DetectionError;
use crate::raster::{from_luma, to_luma};
use dotboard_core::{
    homography_from_4pt, is_convex, order_quad_corners, order_quad_cyclic, polygon_area,
    warp_perspective_gray, GrayImage, GrayImageView, Homography,
};
use image::imageops::{resize, FilterType};
use log::debug;
use nalgebra::{Matrix3, Point2};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Top-down view of the board and the transforms linking it to the input.
#[derive(Clone, Debug)]
pub struct Rectified {
    pub image: GrayImage,
    pub h_rect_from_img: Homography,
    pub h_img_from_rect: Homography,
    /// Uniform upscale applied after warping (1.0 when none).
    pub upscale: f64,
}

/// Sum/difference ordering, unless it reuses a corner (ties near 45
/// degrees) or loses area against the cyclic order.
fn ordered_corners(quad: &[Point2<f64>; 4]) -> [Point2<f64>; 4] {
    let by_sum = order_quad_corners(quad);
    let cyclic = order_quad_cyclic(quad);
    let full = polygon_area(&cyclic);
    if is_convex(&by_sum) && (polygon_area(&by_sum) - full).abs() <= 1e-9 * full.max(1.0) {
        by_sum
    } else {
        cyclic
    }
}

/// Output size keeping the measured aspect ratio, long side within
/// `[min_dim, max_dim]`.
fn target_size(width: f64, height: f64, p: &WarpParams) -> (usize, usize) {
    let long = width.max(height);
    let mut scale = 1.0;
    if long < p.min_dim as f64 {
        scale = p.min_dim as f64 / long;
    }
    if long * scale > p.max_dim as f64 {
        scale = p.max_dim as f64 / long;
    }
    let w = (width * scale).round().max(2.0) as usize;
    let h = (height * scale).round().max(2.0) as usize;
    (w, h)
}

/// Pixel-center-preserving scale between an image and its resized copy.
fn resize_transform(sx: f64, sy: f64) -> Homography {
    Homography::new(Matrix3::new(
        sx,
        0.0,
        0.5 * (sx - 1.0),
        0.0,
        sy,
        0.5 * (sy - 1.0),
        0.0,
        0.0,
        1.0,
    ))
}

/// Warp the quad (any corner order) to an axis-aligned rectangle.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn rectify(
    gray: &GrayImageView<'_>,
    quad: &[Point2<f64>; 4],
    p: &WarpParams,
) -> Result<Rectified, DetectionError> {
    let corners = ordered_corners(quad);
    let [tl, tr, br, bl] = corners;
    let width = (tr - tl).norm().max((br - bl).norm());
    let height = (bl - tl).norm().max((br - tr).norm());
    let area = polygon_area(&corners);
    if !area.is_finite() || area < 4.0 || width < 2.0 || height < 2.0 {
        return Err(DetectionError::WarpFailed(format!(
            "degenerate quad {width:.1}x{height:.1}, area {area:.1}"
        )));
    }

    let (w, h) = target_size(width, height, p);
    let dst = [
        Point2::new(0.0, 0.0),
        Point2::new(w as f64 - 1.0, 0.0),
        Point2::new(w as f64 - 1.0, h as f64 - 1.0),
        Point2::new(0.0, h as f64 - 1.0),
    ];
    let h_rect_from_img = homography_from_4pt(&[tl, tr, br, bl], &dst)
        .ok_or_else(|| DetectionError::WarpFailed("singular corner homography".to_string()))?;
    let h_img_from_rect = h_rect_from_img
        .inverse()
        .ok_or_else(|| DetectionError::WarpFailed("homography is not invertible".to_string()))?;
    let warped = warp_perspective_gray(gray, &h_img_from_rect, w, h);

    let short = w.min(h) as f64;
    let mut s = (p.min_short_side as f64 / short).max(1.0);
    s = s.min(p.max_dim as f64 / w.max(h) as f64).max(1.0);
    if s <= 1.0 + 1e-9 {
        debug!("rectified to {w}x{h}");
        return Ok(Rectified {
            image: warped,
            h_rect_from_img,
            h_img_from_rect,
            upscale: 1.0,
        });
    }

    let (nw, nh) = ((w as f64 * s).round() as u32, (h as f64 * s).round() as u32);
    let up = resize(&to_luma(&warped.view()), nw, nh, FilterType::CatmullRom);
    let scale = resize_transform(nw as f64 / w as f64, nh as f64 / h as f64);
    let h_rect_from_img = scale.compose(&h_rect_from_img);
    let h_img_from_rect = h_rect_from_img.inverse().ok_or_else(|| {
        DetectionError::WarpFailed("scaled homography is not invertible".to_string())
    })?;
    debug!("rectified to {w}x{h}, upscaled x{s:.2} to {nw}x{nh}");

    Ok(Rectified {
        image: from_luma(up),
        h_rect_from_img,
        h_img_from_rect,
        upscale: s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> [Point2<f64>; 4] {
        [
            Point2::new(52.0, 40.0),
            Point2::new(300.0, 58.0),
            Point2::new(288.0, 230.0),
            Point2::new(40.0, 210.0),
        ]
    }

    #[test]
    fn round_trip_reproduces_corners() {
        let img = GrayImage::filled(360, 280, 128);
        let r = rectify(&img.view(), &quad(), &WarpParams::default()).expect("rectified");
        for c in quad() {
            let back = r.h_img_from_rect.apply(r.h_rect_from_img.apply(c));
            assert!((back - c).norm() < 1e-6, "{back:?} vs {c:?}");
        }
        // Upscaling keeps pixel centers aligned, so corners land within a pixel of the border.
        let tl = r.h_rect_from_img.apply(quad()[0]);
        assert!(tl.x.abs() < 1.0 && tl.y.abs() < 1.0, "{tl:?}");
    }

    #[test]
    fn short_side_is_upscaled() {
        let img = GrayImage::filled(360, 280, 128);
        let p = WarpParams::default();
        let r = rectify(&img.view(), &quad(), &p).expect("rectified");
        assert!(r.upscale > 1.0);
        assert!(r.image.width.min(r.image.height) as u32 >= p.min_short_side - 1);
        assert!(r.image.width.max(r.image.height) as u32 <= p.max_dim);
        let (w, h) = (r.image.width as f64, r.image.height as f64);
        let br = r.h_rect_from_img.apply(quad()[2]);
        assert!((br.x - (w - 1.0)).abs() < 1.0 && (br.y - (h - 1.0)).abs() < 1.0, "{br:?}");
    }

    #[test]
    fn corner_order_does_not_matter() {
        let img = GrayImage::filled(360, 280, 128);
        let q = quad();
        let shuffled = [q[2], q[0], q[3], q[1]];
        let p = WarpParams::default();
        let a = rectify(&img.view(), &q, &p).expect("rectified");
        let b = rectify(&img.view(), &shuffled, &p).expect("rectified");
        assert_eq!((a.image.width, a.image.height), (b.image.width, b.image.height));
    }

    #[test]
    fn diamond_at_45_degrees_rectifies() {
        let img = GrayImage::filled(400, 400, 128);
        let diamond = [
            Point2::new(200.0, 60.0),
            Point2::new(340.0, 200.0),
            Point2::new(200.0, 340.0),
            Point2::new(60.0, 200.0),
        ];
        let corners = ordered_corners(&diamond);
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                assert!((a - b).norm() > 1.0, "repeated corner in {corners:?}");
            }
        }
        let r = rectify(&img.view(), &diamond, &WarpParams::default()).expect("rectified");
        for c in diamond {
            let back = r.h_img_from_rect.apply(r.h_rect_from_img.apply(c));
            assert!((back - c).norm() < 1e-6, "{back:?} vs {c:?}");
        }
    }

    #[test]
    fn collinear_quad_fails() {
        let img = GrayImage::filled(100, 100, 0);
        let line = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(30.0, 30.0),
        ];
        let err = rectify(&img.view(), &line, &WarpParams::default()).unwrap_err();
        assert_eq!(err.stage(), "rectify");
    }
}
