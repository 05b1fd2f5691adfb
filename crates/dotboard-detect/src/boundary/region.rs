//! Bright-region boundary strategy: Otsu foreground, morphological close,
//! and the most board-like connected component reduced to a quadrilateral.

use super::{approx_quad, is_valid_score, quad_score, BoardQuad, QuadSource};
use crate::config::{QuadScoreParams, RegionParams};
use crate::raster::luma_view;
use dotboard_core::{convex_hull, order_quad_cyclic};
use image::Luma;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::min_area_rect;
use imageproc::morphology::close;
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::trace;
use nalgebra::Point2;

pub(crate) struct RegionOutcome {
    /// Closed foreground mask, kept for debug output.
    pub mask: image::GrayImage,
    pub quad: Option<BoardQuad>,
}

#[derive(Clone, Copy, Debug)]
struct ComponentStats {
    area: u64,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl ComponentStats {
    fn new(x: u32, y: u32) -> Self {
        Self {
            area: 0,
            x0: x,
            y0: y,
            x1: x,
            y1: y,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.area += 1;
        self.x0 = self.x0.min(x);
        self.y0 = self.y0.min(y);
        self.x1 = self.x1.max(x);
        self.y1 = self.y1.max(y);
    }

    fn fill(&self) -> f64 {
        let bbox = (self.x1 - self.x0 + 1) as f64 * (self.y1 - self.y0 + 1) as f64;
        self.area as f64 / bbox
    }

    fn border_touches(&self, w: u32, h: u32) -> usize {
        [self.x0 == 0, self.y0 == 0, self.x1 + 1 == w, self.y1 + 1 == h]
            .into_iter()
            .filter(|&t| t)
            .count()
    }
}

type Labels = image::ImageBuffer<Luma<u32>, Vec<u32>>;

fn component_stats(labels: &Labels) -> Vec<Option<ComponentStats>> {
    let mut stats: Vec<Option<ComponentStats>> = Vec::new();
    for (x, y, px) in labels.enumerate_pixels() {
        let l = px[0] as usize;
        if l == 0 {
            continue;
        }
        if stats.len() <= l {
            stats.resize(l + 1, None);
        }
        stats[l].get_or_insert_with(|| ComponentStats::new(x, y)).add(x, y);
    }
    stats
}

/// Pixels of `label` with at least one 4-neighbour outside it.
fn boundary_pixels(labels: &Labels, label: u32) -> Vec<Point2<f64>> {
    let (w, h) = labels.dimensions();
    let inside = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && x < w as i64
            && y < h as i64
            && labels.get_pixel(x as u32, y as u32)[0] == label
    };
    labels
        .enumerate_pixels()
        .filter(|(_, _, px)| px[0] == label)
        .filter(|&(x, y, _)| {
            let (x, y) = (x as i64, y as i64);
            !(inside(x - 1, y) && inside(x + 1, y) && inside(x, y - 1) && inside(x, y + 1))
        })
        .map(|(x, y, _)| Point2::new(x as f64, y as f64))
        .collect()
}

fn min_rect_quad(points: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    if points.is_empty() {
        return None;
    }
    let pts: Vec<Point<i32>> = points
        .iter()
        .map(|p| Point::new(p.x as i32, p.y as i32))
        .collect();
    let rect = min_area_rect(&pts).map(|p| Point2::new(p.x as f64, p.y as f64));
    Some(order_quad_cyclic(&rect))
}

/// Run the region strategy. The mask is always returned for debugging.
pub(crate) fn region_candidate(
    gray: &image::GrayImage,
    p: &RegionParams,
    score: &QuadScoreParams,
) -> RegionOutcome {
    let (w, h) = gray.dimensions();
    let blurred = gaussian_blur_f32(gray, p.blur_sigma as f32);
    let level = otsu_level(&blurred);
    let binary = threshold(&blurred, level, ThresholdType::Binary);
    let foreground = binary.pixels().filter(|px| px[0] > 0).count() as u64;
    let total = w as u64 * h as u64;
    if foreground == 0 || foreground == total {
        trace!("otsu level {level} gives a constant mask");
        return RegionOutcome {
            mask: binary,
            quad: None,
        };
    }

    let radius = (p.close_kernel / 2).clamp(1, u8::MAX as u32) as u8;
    let mask = close(&binary, Norm::LInf, radius);
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let min_area = p.min_area_ratio * total as f64;
    let best = component_stats(&labels)
        .into_iter()
        .enumerate()
        .filter_map(|(l, s)| s.map(|s| (l as u32, s)))
        .filter(|(_, s)| s.area as f64 >= min_area)
        .map(|(l, s)| {
            let mut value = s.area as f64 * s.fill();
            if s.border_touches(w, h) >= 3 {
                value *= p.border_touch_penalty;
            }
            if s.area as f64 / total as f64 > p.max_area_fraction {
                value *= p.oversize_penalty;
            }
            (l, value)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let Some((label, _)) = best else {
        trace!("no component above {min_area:.0} px");
        return RegionOutcome { mask, quad: None };
    };

    let boundary = boundary_pixels(&labels, label);
    let hull = convex_hull(&boundary);
    let corners = approx_quad(
        &hull,
        p.approx_eps_ratio,
        p.approx_shrink,
        p.approx_expand,
        p.approx_iterations,
    )
    .or_else(|| min_rect_quad(&boundary));

    let quad = corners.and_then(|corners| {
        let s = quad_score(&luma_view(gray), &corners, score);
        is_valid_score(s).then_some(BoardQuad {
            corners,
            score: s,
            source: QuadSource::Region,
        })
    });
    RegionOutcome { mask, quad }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_bright_rectangle() {
        let img = image::GrayImage::from_fn(320, 240, |x, y| {
            if (60..260).contains(&x) && (50..190).contains(&y) {
                Luma([230])
            } else {
                Luma([30])
            }
        });
        let out = region_candidate(&img, &RegionParams::default(), &QuadScoreParams::default());
        let quad = out.quad.expect("rectangle found");
        let expected = [(60.0, 50.0), (259.0, 50.0), (259.0, 189.0), (60.0, 189.0)];
        for (c, (x, y)) in quad.corners.iter().zip(expected) {
            assert!((c.x - x).abs() < 3.0 && (c.y - y).abs() < 3.0, "{c:?} vs ({x},{y})");
        }
        assert_eq!(out.mask.dimensions(), (320, 240));
    }

    #[test]
    fn constant_image_has_no_region() {
        let img = image::GrayImage::from_pixel(64, 48, Luma([255]));
        let out = region_candidate(&img, &RegionParams::default(), &QuadScoreParams::default());
        assert!(out.quad.is_none());
    }

    #[test]
    fn border_touching_blobs_are_penalized() {
        let s = ComponentStats {
            area: 100,
            x0: 0,
            y0: 0,
            x1: 9,
            y1: 9,
        };
        assert_eq!(s.border_touches(10, 10), 4);
        assert_eq!(s.border_touches(20, 20), 2);
        assert!((s.fill() - 1.0).abs() < 1e-12);
    }
}
