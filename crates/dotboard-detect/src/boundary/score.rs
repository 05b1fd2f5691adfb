//! Plausibility score of a board quadrilateral.

use crate::config::QuadScoreParams;
use dotboard_core::{is_convex, polygon_area, sample_bilinear_checked, GrayImageView};
use nalgebra::Point2;

/// Score of a quadrilateral that violates a hard constraint.
pub const HARD_FAIL: f64 = -1e9;
/// Lowest score a valid quadrilateral can take.
pub const SCORE_FLOOR: f64 = -1e8;

/// True when `score` comes from a quadrilateral that passed every hard check.
#[inline]
pub fn is_valid_score(score: f64) -> bool {
    score >= SCORE_FLOOR
}

/// Mean contrast across the quad edges: per edge, the mean of
/// `inner - outer` bilinear samples, then the absolute value averaged over
/// the edges that had any in-image samples.
pub fn edge_contrast(
    gray: &GrayImageView<'_>,
    quad: &[Point2<f64>; 4],
    samples: usize,
    offset: f64,
) -> Option<f64> {
    let c = Point2::from(quad.iter().map(|p| p.coords).sum::<nalgebra::Vector2<f64>>() / 4.0);
    let mut total = 0.0;
    let mut edges = 0usize;

    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let d = b - a;
        let len = d.norm();
        if len < 1e-9 {
            continue;
        }
        let mut n = nalgebra::Vector2::new(-d.y, d.x) / len;
        let mid = a + d * 0.5;
        if n.dot(&(c - mid)) < 0.0 {
            n = -n;
        }

        let mut sum = 0.0;
        let mut count = 0usize;
        for s in 0..samples {
            let t = (s as f64 + 0.5) / samples as f64;
            let p = a + d * t;
            let inner = p + n * offset;
            let outer = p - n * offset;
            if let (Some(vi), Some(vo)) = (
                sample_bilinear_checked(gray, inner.x, inner.y),
                sample_bilinear_checked(gray, outer.x, outer.y),
            ) {
                sum += vi - vo;
                count += 1;
            }
        }
        if count > 0 {
            total += (sum / count as f64).abs();
            edges += 1;
        }
    }

    (edges > 0).then(|| total / edges as f64)
}

/// Score a candidate board quadrilateral ordered TL, TR, BR, BL.
///
/// Returns [`HARD_FAIL`] for quads that break a hard bound and otherwise a
/// value no lower than [`SCORE_FLOOR`].
pub fn quad_score(gray: &GrayImageView<'_>, quad: &[Point2<f64>; 4], p: &QuadScoreParams) -> f64 {
    let finite = quad.iter().all(|v| v.x.is_finite() && v.y.is_finite());
    if gray.width == 0 || gray.height == 0 || !finite {
        return HARD_FAIL;
    }
    let w = gray.width as f64;
    let h = gray.height as f64;
    let mut penalty = 0.0;

    let band = 3.0 * p.margin_px + 12.0;
    for v in quad {
        let excess = [0.0, -v.x, v.x - (w - 1.0), -v.y, v.y - (h - 1.0)]
            .into_iter()
            .fold(0.0_f64, f64::max);
        if excess > band {
            return HARD_FAIL;
        }
        if excess > p.margin_px {
            penalty += p.margin_penalty * (excess - p.margin_px) / (band - p.margin_px);
        }
    }

    if !is_convex(quad) {
        return HARD_FAIL;
    }

    let area = polygon_area(quad);
    let ratio = area / (w * h);
    if ratio < 0.15 * p.min_area_ratio || ratio > 1.6 * p.max_area_ratio {
        return HARD_FAIL;
    }
    if ratio < p.min_area_ratio {
        penalty += p.area_penalty * (p.min_area_ratio - ratio) / p.min_area_ratio;
    } else if ratio > p.max_area_ratio {
        penalty += p.area_penalty * (ratio - p.max_area_ratio) / p.max_area_ratio;
    }

    let [tl, tr, br, bl] = *quad;
    let width = 0.5 * ((tr - tl).norm() + (br - bl).norm());
    let height = 0.5 * ((bl - tl).norm() + (br - tr).norm());
    if height < 1e-9 {
        return HARD_FAIL;
    }
    let aspect = width / height;
    if aspect < 0.7 * p.aspect_min || aspect > 1.5 * p.aspect_max {
        return HARD_FAIL;
    }
    if aspect < p.aspect_min {
        penalty += p.aspect_penalty * (p.aspect_min - aspect) / p.aspect_min;
    } else if aspect > p.aspect_max {
        penalty += p.aspect_penalty * (aspect - p.aspect_max) / p.aspect_max;
    }

    let Some(contrast) = edge_contrast(gray, quad, p.edge_samples, p.edge_offset_px) else {
        return HARD_FAIL;
    };
    if contrast < 0.45 * p.min_contrast {
        return HARD_FAIL;
    }
    if contrast < p.min_contrast {
        penalty += p.contrast_penalty * (p.min_contrast - contrast) / p.min_contrast;
    }

    let score = contrast / 255.0 * p.contrast_weight + p.area_bonus * area.sqrt() - penalty;
    score.max(SCORE_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotboard_core::GrayImage;

    fn board_image() -> GrayImage {
        let mut img = GrayImage::filled(200, 200, 20);
        for y in 40..160 {
            for x in 30..170 {
                img.set(x, y, 220);
            }
        }
        img
    }

    fn ramp_image() -> GrayImage {
        let mut img = GrayImage::new(200, 200);
        for y in 0..200 {
            for x in 0..200 {
                img.set(x, y, x as u8);
            }
        }
        img
    }

    fn quad(pts: [(f64, f64); 4]) -> [Point2<f64>; 4] {
        pts.map(|(x, y)| Point2::new(x, y))
    }

    #[test]
    fn matching_quad_scores_high() {
        let img = board_image();
        let p = QuadScoreParams::default();
        let exact = quad_score(
            &img.view(),
            &quad([(30.0, 40.0), (169.0, 40.0), (169.0, 159.0), (30.0, 159.0)]),
            &p,
        );
        let shifted = quad_score(
            &img.view(),
            &quad([(50.0, 60.0), (189.0, 60.0), (189.0, 179.0), (50.0, 179.0)]),
            &p,
        );
        assert!(is_valid_score(exact));
        assert!(exact > shifted, "exact {exact} vs shifted {shifted}");
    }

    #[test]
    fn vertex_margin_band_is_graded() {
        let img = ramp_image();
        let p = QuadScoreParams {
            min_contrast: 4.0,
            contrast_weight: 0.0,
            ..QuadScoreParams::default()
        };
        let with_bl = |x: f64| quad([(30.0, 30.0), (170.0, 30.0), (170.0, 170.0), (x, 170.0)]);

        let near = quad_score(&img.view(), &with_bl(-10.0), &p);
        let far = quad_score(&img.view(), &with_bl(-20.0), &p);
        let out = quad_score(&img.view(), &with_bl(-40.0), &p);

        assert!(is_valid_score(near), "near {near}");
        assert!(is_valid_score(far), "far {far}");
        assert!(near > far, "near {near} vs far {far}");
        assert_eq!(out, HARD_FAIL);
    }

    #[test]
    fn uniform_image_has_no_board() {
        let img = GrayImage::filled(120, 100, 255);
        let full = quad([(0.0, 0.0), (119.0, 0.0), (119.0, 99.0), (0.0, 99.0)]);
        assert_eq!(quad_score(&img.view(), &full, &QuadScoreParams::default()), HARD_FAIL);
    }

    #[test]
    fn non_convex_quads_fail() {
        let img = board_image();
        let bow_tie = quad([(30.0, 40.0), (169.0, 159.0), (169.0, 40.0), (30.0, 159.0)]);
        assert_eq!(quad_score(&img.view(), &bow_tie, &QuadScoreParams::default()), HARD_FAIL);
    }
}
