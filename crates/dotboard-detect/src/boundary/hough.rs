//! Line-pair boundary strategy.
//!
//! Accumulator lines from the edge map are walked pixel by pixel and split
//! into supported segments. Segments are clustered into two orientation
//! families, duplicates are suppressed, and every pair-of-pairs with roughly
//! orthogonal families is intersected into a quadrilateral and scored.

use super::{is_valid_score, quad_score, BoardQuad, QuadSource};
use crate::config::{HoughParams, QuadScoreParams};
use crate::raster::median_intensity;
use dotboard_core::{
    kmeans_farthest, order_quad_cyclic, orientation_difference, GrayImageView, Line2,
};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{detect_lines, LineDetectionOptions};
use imageproc::morphology::dilate;
use log::trace;
use nalgebra::{Point2, Vector2};

/// Binary edge image used by both the line strategy and quad refinement.
pub(crate) fn edge_map(gray: &image::GrayImage, p: &HoughParams) -> image::GrayImage {
    let blurred = gaussian_blur_f32(gray, p.blur_sigma as f32);
    let med = median_intensity(&blurred);
    let low = (p.canny_low_ratio * med).max(p.canny_low_min).clamp(0.0, 255.0);
    let high = (low * p.canny_high_ratio).max(low + 1.0).clamp(0.0, 255.0);
    let edges = canny(&blurred, low as f32, high as f32);
    if p.dilate_edges {
        dilate(&edges, Norm::LInf, p.dilate_radius)
    } else {
        edges
    }
}

/// Edge-supported piece of an accumulator line.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Segment {
    pub a: Point2<f64>,
    pub b: Point2<f64>,
    pub line: Line2,
}

impl Segment {
    pub fn length(&self) -> f64 {
        (self.b - self.a).norm()
    }

    pub fn midpoint(&self) -> Point2<f64> {
        Point2::from((self.a.coords + self.b.coords) * 0.5)
    }
}

/// Parameter range `[t0, t1]` of `p0 + t * d` inside `[0, w-1] x [0, h-1]`.
fn clip(p0: Point2<f64>, d: Vector2<f64>, w: f64, h: f64) -> Option<(f64, f64)> {
    let mut t0 = f64::NEG_INFINITY;
    let mut t1 = f64::INFINITY;
    for (start, dir, max) in [(p0.x, d.x, w - 1.0), (p0.y, d.y, h - 1.0)] {
        if dir.abs() < 1e-12 {
            if start < 0.0 || start > max {
                return None;
            }
            continue;
        }
        let a = (0.0 - start) / dir;
        let b = (max - start) / dir;
        t0 = t0.max(a.min(b));
        t1 = t1.min(a.max(b));
    }
    (t0 <= t1).then_some((t0, t1))
}

fn is_edge(edges: &image::GrayImage, x: f64, y: f64) -> Option<(u32, u32)> {
    let (xi, yi) = (x.round(), y.round());
    if xi < 0.0 || yi < 0.0 || xi >= edges.width() as f64 || yi >= edges.height() as f64 {
        return None;
    }
    let (xi, yi) = (xi as u32, yi as u32);
    (edges.get_pixel(xi, yi)[0] > 0).then_some((xi, yi))
}

fn close_run(points: &mut Vec<Point2<f64>>, min_len: f64, out: &mut Vec<Segment>) {
    if points.len() >= 2 {
        if let Some(line) = Line2::fit(points) {
            let a = line.project(points[0]);
            let b = line.project(points[points.len() - 1]);
            if (b - a).norm() >= min_len {
                out.push(Segment { a, b, line });
            }
        }
    }
    points.clear();
}

/// Split one accumulator line into runs of edge support.
pub(crate) fn walk_line(
    edges: &image::GrayImage,
    line: &Line2,
    band: i32,
    min_len: f64,
    max_gap: f64,
) -> Vec<Segment> {
    let (w, h) = (edges.width() as f64, edges.height() as f64);
    let d = line.direction();
    let n = line.normal;
    let p0 = Point2::from(n * line.offset);
    let Some((t0, t1)) = clip(p0, d, w, h) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut run: Vec<Point2<f64>> = Vec::new();
    let mut hits = Vec::new();
    let mut last_hit = f64::NEG_INFINITY;
    let steps = (t1 - t0).floor() as usize;
    for s in 0..=steps {
        let t = t0 + s as f64;
        let base = p0 + d * t;
        hits.clear();
        for k in -band..=band {
            let q = base + n * k as f64;
            if let Some((x, y)) = is_edge(edges, q.x, q.y) {
                hits.push(Point2::new(x as f64, y as f64));
            }
        }
        if hits.is_empty() {
            continue;
        }
        if t - last_hit > max_gap {
            close_run(&mut run, min_len, &mut out);
        }
        run.extend_from_slice(&hits);
        last_hit = t;
    }
    close_run(&mut run, min_len, &mut out);
    out
}

/// Segments supported by the edge map along every accumulator line.
pub(crate) fn detect_segments(edges: &image::GrayImage, p: &HoughParams) -> Vec<Segment> {
    let min_dim = edges.width().min(edges.height()) as f64;
    let opts = LineDetectionOptions {
        vote_threshold: (p.vote_ratio * min_dim).round().max(1.0) as u32,
        suppression_radius: p.suppression_radius,
    };
    let lines = detect_lines(edges, opts);
    trace!("{} accumulator lines", lines.len());

    let band = p.band_px.round().max(0.0) as i32;
    let min_len = p.min_length_ratio * min_dim;
    let max_gap = (p.max_gap_ratio * min_dim).max(1.0);
    lines
        .iter()
        .map(|l| Line2::from_polar(l.r as f64, (l.angle_in_degrees as f64).to_radians()))
        .flat_map(|l| walk_line(edges, &l, band, min_len, max_gap))
        .collect()
}

/// Keep the longest segments, dropping near-duplicates of ones already kept.
fn suppress_duplicates(
    mut group: Vec<Segment>,
    angle_tol: f64,
    rho_tol: f64,
    cap: usize,
) -> Vec<Segment> {
    group.sort_by(|a, b| b.length().total_cmp(&a.length()));
    let mut kept: Vec<Segment> = Vec::new();
    for s in group {
        if kept.len() >= cap {
            break;
        }
        let duplicate = kept.iter().any(|k| {
            orientation_difference(k.line.angle(), s.line.angle()) < angle_tol
                && k.line.signed_distance(s.midpoint()).abs() < rho_tol
        });
        if !duplicate {
            kept.push(s);
        }
    }
    kept
}

/// Mean of two undirected orientations.
fn mean_orientation(a: f64, b: f64) -> f64 {
    let (s, c) = ((2.0 * a).sin() + (2.0 * b).sin(), (2.0 * a).cos() + (2.0 * b).cos());
    (0.5 * s.atan2(c)).rem_euclid(std::f64::consts::PI)
}

/// Roughly parallel, well separated line pairs within one family.
fn parallel_pairs(group: &[Segment], tol: f64, min_sep: f64) -> Vec<(Line2, Line2, f64)> {
    let mut pairs = Vec::new();
    for (i, a) in group.iter().enumerate() {
        for b in &group[i + 1..] {
            let (ta, tb) = (a.line.angle(), b.line.angle());
            if orientation_difference(ta, tb) > tol {
                continue;
            }
            if a.line.signed_distance(b.midpoint()).abs() < min_sep {
                continue;
            }
            pairs.push((a.line, b.line, mean_orientation(ta, tb)));
        }
    }
    pairs
}

/// Best quadrilateral formed by two pairs of edge lines, if any scores valid.
pub(crate) fn line_candidate(
    gray: &GrayImageView<'_>,
    edges: &image::GrayImage,
    p: &HoughParams,
    score: &QuadScoreParams,
) -> Option<BoardQuad> {
    let segments = detect_segments(edges, p);
    if segments.len() < 4 {
        trace!("only {} segments", segments.len());
        return None;
    }

    let features: Vec<[f64; 2]> = segments
        .iter()
        .map(|s| {
            let t = 2.0 * s.line.angle();
            [t.cos(), t.sin()]
        })
        .collect();
    let longest = (0..segments.len())
        .max_by(|&i, &j| segments[i].length().total_cmp(&segments[j].length()))?;
    let km = kmeans_farthest(&features, 2, longest, 50)?;

    let min_dim = edges.width().min(edges.height()) as f64;
    let rho_tol = p.rho_nms_ratio * min_dim;
    let angle_tol = p.angle_nms_deg.to_radians();
    let mut groups = [Vec::new(), Vec::new()];
    for (s, &l) in segments.iter().zip(&km.labels) {
        groups[l].push(*s);
    }
    let [g0, g1] =
        groups.map(|g| suppress_duplicates(g, angle_tol, rho_tol, p.max_lines_per_group));

    let orient_tol = p.orientation_tol_deg.to_radians();
    let min_sep = p.min_separation_ratio * min_dim;
    let pairs0 = parallel_pairs(&g0, orient_tol, min_sep);
    let pairs1 = parallel_pairs(&g1, orient_tol, min_sep);
    trace!("line pairs: {} x {}", pairs0.len(), pairs1.len());

    let ortho_tol = p.orthogonality_tol_deg.to_radians();
    let mut best: Option<BoardQuad> = None;
    for (a1, a2, ta) in &pairs0 {
        for (b1, b2, tb) in &pairs1 {
            let deviation = (std::f64::consts::FRAC_PI_2 - orientation_difference(*ta, *tb)).abs();
            if deviation > ortho_tol {
                continue;
            }
            let corners = [
                a1.intersect(b1),
                a1.intersect(b2),
                a2.intersect(b2),
                a2.intersect(b1),
            ];
            let [Some(c0), Some(c1), Some(c2), Some(c3)] = corners else {
                continue;
            };
            let quad = order_quad_cyclic(&[c0, c1, c2, c3]);
            let s = quad_score(gray, &quad, score);
            if is_valid_score(s) && best.as_ref().is_none_or(|b| s > b.score) {
                best = Some(BoardQuad {
                    corners: quad,
                    score: s,
                    source: QuadSource::Lines,
                });
            }
        }
    }
    best
}
