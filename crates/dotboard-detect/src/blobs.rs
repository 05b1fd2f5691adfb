//! Dark circular blob detection on the rectified board, with per-blob
//! sub-pixel refinement.
//!
//! Detection sweeps a range of intensity thresholds. At each level the dark
//! pixels are traced into outer contours, and contours that look like filled
//! discs (area, circularity, convexity, inertia) become centers. Centers that
//! reappear across enough levels are merged into one blob.

use crate::config::{BlobParams, BlobRefineParams};
use crate::raster::sigma_for_kernel;
use dotboard_core::{convex_hull, perimeter, polygon_area, Histogram, PolygonMoments};
use image::imageops::crop_imm;
use image::Luma;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Blob as reported by the threshold sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawBlob {
    pub center: Point2<f64>,
    pub radius: f64,
    /// Thresholds at which the blob was seen.
    pub repeats: usize,
}

impl RawBlob {
    /// Diameter, the size measure used for small/large classification.
    pub fn size(&self) -> f64 {
        2.0 * self.radius
    }
}

/// Blob after local refinement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefinedBlob {
    pub center: Point2<f64>,
    pub radius: f64,
    /// Diameter from the detector, kept for classification.
    pub size: f64,
    /// 1.0 when the refined center was accepted.
    pub confidence: f64,
    pub refined: bool,
}

impl RefinedBlob {
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }

    pub fn unrefined(raw: &RawBlob, confidence: f64) -> Self {
        Self {
            center: raw.center,
            radius: raw.radius,
            size: raw.size(),
            confidence,
            refined: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Center {
    location: Point2<f64>,
    radius: f64,
}

fn contour_points(c: &Contour<i32>) -> Vec<Point2<f64>> {
    c.points
        .iter()
        .map(|p| Point2::new(p.x as f64, p.y as f64))
        .collect()
}

/// Shape-filtered disc center from one contour, if it passes every filter.
fn disc_center(pts: &[Point2<f64>], p: &BlobParams) -> Option<Center> {
    if pts.len() < 5 {
        return None;
    }
    let m = PolygonMoments::of(pts);
    let area = m.area();
    if area < p.min_area || area > p.max_area {
        return None;
    }
    let perim = perimeter(pts);
    if perim <= 0.0 {
        return None;
    }
    let circularity = 4.0 * std::f64::consts::PI * area / (perim * perim);
    if circularity < p.min_circularity {
        return None;
    }
    let hull_area = polygon_area(&convex_hull(pts));
    if hull_area <= 0.0 || area / hull_area < p.min_convexity {
        return None;
    }
    if m.inertia_ratio() < p.min_inertia_ratio {
        return None;
    }
    let location = m.centroid()?;
    let mut dists: Vec<f64> = pts.iter().map(|q| (q - location).norm()).collect();
    dists.sort_by(f64::total_cmp);
    // Contour pixels sit half a pixel inside the dark region's edge.
    let radius = dists[dists.len() / 2] + 0.5;
    Some(Center { location, radius })
}

fn centers_at(gray: &image::GrayImage, level: u32, p: &BlobParams) -> Vec<Center> {
    let binary = image::GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if (gray.get_pixel(x, y)[0] as u32) < level {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    find_contours::<i32>(&binary)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter_map(|c| disc_center(&contour_points(c), p))
        .collect()
}

/// Detect dark discs by sweeping thresholds and merging repeated centers.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn detect_blobs(gray: &image::GrayImage, p: &BlobParams) -> Vec<RawBlob> {
    let mut groups: Vec<Vec<Center>> = Vec::new();
    let step = p.threshold_step.max(1) as usize;
    for level in (p.min_threshold..p.max_threshold).step_by(step) {
        let current = centers_at(gray, level, p);
        let mut matched_this_level = vec![false; groups.len()];
        for c in current {
            let hit = groups.iter().position(|g| {
                let reference = g[g.len() / 2];
                let d = (reference.location - c.location).norm();
                d < p.min_dist_between_blobs.max(reference.radius).max(c.radius)
            });
            match hit {
                Some(i) if !matched_this_level[i] => {
                    groups[i].push(c);
                    matched_this_level[i] = true;
                }
                Some(_) => {}
                None => {
                    groups.push(vec![c]);
                    matched_this_level.push(true);
                }
            }
        }
    }

    let blobs: Vec<RawBlob> = groups
        .into_iter()
        .filter(|g| g.len() >= p.min_repeatability)
        .map(|mut g| {
            let n = g.len() as f64;
            let sum: nalgebra::Vector2<f64> = g.iter().map(|c| c.location.coords).sum();
            let center = Point2::from(sum / n);
            g.sort_by(|a, b| a.radius.total_cmp(&b.radius));
            RawBlob {
                center,
                radius: g[g.len() / 2].radius,
                repeats: g.len(),
            }
        })
        .collect();
    debug!("{} blobs from the threshold sweep", blobs.len());
    blobs
}

/// Odd window side for a blob of radius `r`.
fn window_side(r: f64, p: &BlobRefineParams) -> u32 {
    let side = (r * p.win_scale).round().clamp(p.win_min as f64, p.win_max as f64) as u32;
    side | 1
}

/// Re-estimate one blob from an Otsu threshold of its neighbourhood.
fn refine_one(
    gray: &image::GrayImage,
    raw: &RawBlob,
    p: &BlobRefineParams,
) -> Option<(Point2<f64>, f64)> {
    let (w, h) = gray.dimensions();
    let half = (window_side(raw.radius, p) / 2) as i64;
    let cx = raw.center.x.round() as i64;
    let cy = raw.center.y.round() as i64;
    let x0 = (cx - half).clamp(0, w as i64) as u32;
    let y0 = (cy - half).clamp(0, h as i64) as u32;
    let x1 = (cx + half + 1).clamp(0, w as i64) as u32;
    let y1 = (cy + half + 1).clamp(0, h as i64) as u32;
    if x1 < x0 + 3 || y1 < y0 + 3 {
        return None;
    }

    let window = crop_imm(gray, x0, y0, x1 - x0, y1 - y0).to_image();
    let blurred = gaussian_blur_f32(&window, sigma_for_kernel(p.blur_kernel));
    let (lo, hi) = Histogram::from_samples(blurred.as_raw().iter().copied()).min_max()?;
    if lo == hi {
        return None;
    }
    // Dots are dark: pixels at or below the level become foreground.
    let binary = threshold(&blurred, otsu_level(&blurred), ThresholdType::BinaryInverted);

    let (moments, _) = find_contours::<i32>(&binary)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .map(|c| {
            let m = PolygonMoments::of(&contour_points(c));
            (m, m.area())
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    let local = moments.centroid()?;
    let center = Point2::new(local.x + x0 as f64, local.y + y0 as f64);
    let radius = (moments.area() / std::f64::consts::PI).sqrt() + 0.5;
    Some((center, radius))
}

/// Refine every blob; a refined center is kept only when it stays within
/// `radius * max(1, gate)` of the raw one.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(n = raw.len())))]
pub fn refine_blobs(
    gray: &image::GrayImage,
    raw: &[RawBlob],
    p: &BlobRefineParams,
) -> Vec<RefinedBlob> {
    if !p.enabled {
        return raw.iter().map(|b| RefinedBlob::unrefined(b, 1.0)).collect();
    }
    let gate = p.gate.max(1.0);
    let mut rejected = 0usize;
    let out = raw
        .iter()
        .map(|b| match refine_one(gray, b, p) {
            Some((center, radius)) if (center - b.center).norm() <= b.radius * gate => {
                RefinedBlob {
                    center,
                    radius,
                    size: b.size(),
                    confidence: 1.0,
                    refined: true,
                }
            }
            _ => {
                rejected += 1;
                RefinedBlob::unrefined(b, p.raw_confidence)
            }
        })
        .collect();
    if rejected > 0 {
        debug!("{rejected} of {} blobs kept their raw center", raw.len());
    }
    out
}
