//! Board boundary detection.
//!
//! Two independent strategies propose a quadrilateral: paired line segments
//! from an edge map, and the best bright connected region. Each proposal can
//! be re-fitted locally, and the highest [`quad_score`] wins.

mod hough;
mod refine;
mod region;
mod score;

pub use score::{edge_contrast, is_valid_score, quad_score, HARD_FAIL, SCORE_FLOOR};

use crate::config::DetectionConfig;
use crate::debug::DebugSink;
use crate::error::DetectionError;
use crate::raster::luma_view;
use dotboard_core::{order_quad_cyclic, perimeter, polygon_area, simplify_closed_polygon};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Which strategy produced a board quadrilateral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuadSource {
    Lines,
    LinesRefined,
    Region,
    RegionRefined,
}

/// Board outline in image pixels, ordered TL, TR, BR, BL.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardQuad {
    pub corners: [Point2<f64>; 4],
    pub score: f64,
    pub source: QuadSource,
}

impl BoardQuad {
    pub fn area(&self) -> f64 {
        polygon_area(&self.corners)
    }
}

/// Reduce a convex outline to four vertices by adjusting the
/// Douglas-Peucker tolerance: grow it while too many vertices survive,
/// shrink it while too few do, and bisect once both bounds are known.
pub(crate) fn approx_quad(
    hull: &[Point2<f64>],
    eps_ratio: f64,
    shrink: f64,
    expand: f64,
    iterations: usize,
) -> Option<[Point2<f64>; 4]> {
    if hull.len() < 4 {
        return None;
    }
    let mut eps = eps_ratio * perimeter(hull);
    if !eps.is_finite() || eps <= 0.0 {
        return None;
    }
    let mut too_fine: Option<f64> = None;
    let mut too_coarse: Option<f64> = None;

    for _ in 0..iterations {
        let poly = simplify_closed_polygon(hull, eps);
        match poly.len() {
            4 => return Some(order_quad_cyclic(&[poly[0], poly[1], poly[2], poly[3]])),
            n if n > 4 => {
                too_fine = Some(eps);
                eps = too_coarse.map_or(eps * expand, |hi| 0.5 * (eps + hi));
            }
            _ => {
                too_coarse = Some(eps);
                eps = too_fine.map_or(eps * shrink, |lo| 0.5 * (lo + eps));
            }
        }
    }
    None
}

/// Find the board outline in a grayscale image.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(width = gray.width(), height = gray.height()))
)]
pub fn detect_board_boundary(
    gray: &image::GrayImage,
    cfg: &DetectionConfig,
    sink: &DebugSink,
) -> Result<BoardQuad, DetectionError> {
    let view = luma_view(gray);

    let edges = hough::edge_map(gray, &cfg.hough);
    sink.save_luma("01_edges", &edges);

    let mut proposals = Vec::new();
    if let Some(q) = hough::line_candidate(&view, &edges, &cfg.hough, &cfg.quad) {
        debug!("line strategy proposal score {:.1}", q.score);
        proposals.push(q);
    }

    let region = region::region_candidate(gray, &cfg.region, &cfg.quad);
    sink.save_luma("02_region_mask", &region.mask);
    if let Some(q) = region.quad {
        debug!("region strategy proposal score {:.1}", q.score);
        proposals.push(q);
    }

    if proposals.is_empty() {
        return Err(DetectionError::BoardNotFound(
            "neither line pairs nor bright regions produced a valid quadrilateral".to_string(),
        ));
    }

    let mut candidates = proposals.clone();
    if cfg.refine_quad.enabled {
        for base in &proposals {
            if let Some(q) = refine::refine_quad(gray, base, cfg) {
                debug!("{:?} refined to score {:.1}", base.source, q.score);
                candidates.push(q);
            }
        }
    }

    candidates
        .into_iter()
        .filter(|q| is_valid_score(q.score))
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or_else(|| {
            DetectionError::BoardNotFound("no candidate quadrilateral passed scoring".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_quad_collapses_noisy_rectangle() {
        let mut outline = Vec::new();
        for i in 0..40 {
            let t = i as f64;
            outline.push(Point2::new(10.0 + t * 5.0, 20.0 + (i % 2) as f64 * 0.4));
        }
        for i in 0..30 {
            outline.push(Point2::new(210.0, 20.0 + i as f64 * 5.0));
        }
        for i in 0..40 {
            outline.push(Point2::new(210.0 - i as f64 * 5.0, 170.0));
        }
        for i in 0..30 {
            outline.push(Point2::new(10.0, 170.0 - i as f64 * 5.0));
        }
        let q = approx_quad(&outline, 0.02, 0.7, 1.3, 24).expect("quad");
        let expected = [
            Point2::new(10.0, 20.0),
            Point2::new(210.0, 20.0),
            Point2::new(210.0, 170.0),
            Point2::new(10.0, 170.0),
        ];
        for (got, want) in q.iter().zip(expected.iter()) {
            assert!((got - want).norm() < 1.0, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn approx_quad_rejects_tiny_inputs() {
        let tri = [
            Point2::new(0.0, 0.0),
            Point2::new(5.0, 0.0),
            Point2::new(0.0, 5.0),
        ];
        assert!(approx_quad(&tri, 0.02, 0.7, 1.3, 10).is_none());
    }
}
