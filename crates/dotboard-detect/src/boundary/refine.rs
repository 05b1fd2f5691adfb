//! Local re-fit of a candidate quadrilateral from the edges around it.

use super::{approx_quad, hough::edge_map, is_valid_score, quad_score, BoardQuad, QuadSource};
use crate::config::DetectionConfig;
use crate::raster::luma_view;
use dotboard_core::{centroid, convex_hull, point_in_polygon, polygon_area};
use image::imageops::crop_imm;
use imageproc::contours::{find_contours, BorderType};
use log::trace;
use nalgebra::Point2;

fn refined_source(source: QuadSource) -> QuadSource {
    match source {
        QuadSource::Lines | QuadSource::LinesRefined => QuadSource::LinesRefined,
        QuadSource::Region | QuadSource::RegionRefined => QuadSource::RegionRefined,
    }
}

fn bounds(v: &[f64; 4]) -> (f64, f64) {
    v.iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}

/// Grow a convex quad outward by roughly `amount` pixels at every corner.
fn expand_quad(quad: &[Point2<f64>; 4], amount: f64) -> [Point2<f64>; 4] {
    let c = Point2::from(quad.iter().map(|p| p.coords).sum::<nalgebra::Vector2<f64>>() / 4.0);
    quad.map(|v| {
        let d = v - c;
        let len = d.norm();
        if len < 1e-9 {
            v
        } else {
            v + d * (amount * std::f64::consts::SQRT_2 / len)
        }
    })
}

/// Re-fit `base` from the edge map of a padded crop around it. Returns
/// `None` when the re-fit is invalid or drifts too far from `base`.
pub(crate) fn refine_quad(
    gray: &image::GrayImage,
    base: &BoardQuad,
    cfg: &DetectionConfig,
) -> Option<BoardQuad> {
    let p = &cfg.refine_quad;
    let (w, h) = gray.dimensions();
    let xs = base.corners.map(|c| c.x);
    let ys = base.corners.map(|c| c.y);
    let (min_x, max_x) = bounds(&xs);
    let (min_y, max_y) = bounds(&ys);
    let pad = (p.pad_ratio * (max_x - min_x).max(max_y - min_y)).max(p.pad_min_px);

    let x0 = (min_x - pad).floor().clamp(0.0, w as f64) as u32;
    let y0 = (min_y - pad).floor().clamp(0.0, h as f64) as u32;
    let x1 = (max_x + pad).ceil().clamp(0.0, w as f64) as u32;
    let y1 = (max_y + pad).ceil().clamp(0.0, h as f64) as u32;
    if x1 <= x0 + 8 || y1 <= y0 + 8 {
        return None;
    }
    let crop = crop_imm(gray, x0, y0, x1 - x0, y1 - y0).to_image();
    let mut edges = edge_map(&crop, &cfg.hough);

    let origin = nalgebra::Vector2::new(x0 as f64, y0 as f64);
    let local: Vec<Point2<f64>> = expand_quad(&base.corners, 0.5 * pad)
        .iter()
        .map(|v| v - origin)
        .collect();
    for (x, y, px) in edges.enumerate_pixels_mut() {
        if px[0] > 0 && !point_in_polygon(Point2::new(x as f64, y as f64), &local) {
            px[0] = 0;
        }
    }

    let hull = find_contours::<i32>(&edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 4)
        .map(|c| {
            let pts: Vec<Point2<f64>> = c
                .points
                .iter()
                .map(|p| Point2::new(p.x as f64, p.y as f64))
                .collect();
            convex_hull(&pts)
        })
        .max_by(|a, b| polygon_area(a).total_cmp(&polygon_area(b)))?;

    let rp = &cfg.region;
    let quad = approx_quad(
        &hull,
        rp.approx_eps_ratio,
        rp.approx_shrink,
        rp.approx_expand,
        rp.approx_iterations,
    )?
    .map(|v| v + origin);
    let score = quad_score(&luma_view(gray), &quad, &cfg.quad);
    if !is_valid_score(score) {
        trace!("refit of {:?} scored {score:.1}", base.source);
        return None;
    }

    let drift = (centroid(&quad)? - centroid(&base.corners)?).norm();
    let limit = (p.max_drift_factor * pad).max(p.max_drift_min_px);
    if drift > limit {
        trace!("refit of {:?} drifted {drift:.1} px (limit {limit:.1})", base.source);
        return None;
    }

    Some(BoardQuad {
        corners: quad,
        score,
        source: refined_source(base.source),
    })
}
