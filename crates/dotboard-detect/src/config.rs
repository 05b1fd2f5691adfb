//! Tunable detection thresholds.
//!
//! Every stage has its own parameter block. All blocks deserialize with
//! `#[serde(default)]`, so a JSON file only needs the fields it overrides.
//! [`DetectionConfig::sanitize`] repairs out-of-range values before use.

use serde::{Deserialize, Serialize};

/// Edge + line-segment board boundary strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughParams {
    /// Gaussian pre-blur before edge detection.
    pub blur_sigma: f64,
    /// Canny low threshold as a fraction of the median intensity.
    pub canny_low_ratio: f64,
    /// Floor for the Canny low threshold.
    pub canny_low_min: f64,
    /// Canny high threshold as a multiple of the low threshold.
    pub canny_high_ratio: f64,
    pub dilate_edges: bool,
    pub dilate_radius: u8,
    /// Accumulator votes needed, as a fraction of the shorter image side.
    pub vote_ratio: f64,
    /// Accumulator non-maximum suppression radius.
    pub suppression_radius: u32,
    /// Minimum segment length, as a fraction of the shorter image side.
    pub min_length_ratio: f64,
    /// Largest gap bridged inside a segment, as a fraction of the shorter side.
    pub max_gap_ratio: f64,
    /// Distance from the ideal line within which edge pixels count, in pixels.
    pub band_px: f64,
    /// Lines closer than this (fraction of the shorter side) are duplicates.
    pub rho_nms_ratio: f64,
    pub angle_nms_deg: f64,
    pub max_lines_per_group: usize,
    /// Allowed angle between the two lines of one pair.
    pub orientation_tol_deg: f64,
    /// Allowed deviation from 90 degrees between the two pairs.
    pub orthogonality_tol_deg: f64,
    /// Minimum distance between paired lines, fraction of the shorter side.
    pub min_separation_ratio: f64,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.2,
            canny_low_ratio: 0.66,
            canny_low_min: 20.0,
            canny_high_ratio: 2.0,
            dilate_edges: true,
            dilate_radius: 1,
            vote_ratio: 0.15,
            suppression_radius: 8,
            min_length_ratio: 0.15,
            max_gap_ratio: 0.02,
            band_px: 2.0,
            rho_nms_ratio: 0.02,
            angle_nms_deg: 4.0,
            max_lines_per_group: 10,
            orientation_tol_deg: 12.0,
            orthogonality_tol_deg: 30.0,
            min_separation_ratio: 0.1,
        }
    }
}

/// Weights and bounds of the quadrilateral score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadScoreParams {
    /// Vertices may sit this far outside the image without penalty.
    pub margin_px: f64,
    pub min_area_ratio: f64,
    pub max_area_ratio: f64,
    pub aspect_min: f64,
    pub aspect_max: f64,
    /// Contrast samples per edge.
    pub edge_samples: usize,
    /// Distance of the inner/outer contrast samples from the edge.
    pub edge_offset_px: f64,
    /// Minimum mean edge contrast in gray levels.
    pub min_contrast: f64,
    pub contrast_weight: f64,
    pub area_bonus: f64,
    pub margin_penalty: f64,
    pub area_penalty: f64,
    pub aspect_penalty: f64,
    pub contrast_penalty: f64,
}

impl Default for QuadScoreParams {
    fn default() -> Self {
        Self {
            margin_px: 4.0,
            min_area_ratio: 0.05,
            max_area_ratio: 0.95,
            aspect_min: 0.4,
            aspect_max: 2.5,
            edge_samples: 48,
            edge_offset_px: 5.0,
            min_contrast: 25.0,
            contrast_weight: 2000.0,
            area_bonus: 0.5,
            margin_penalty: 400.0,
            area_penalty: 600.0,
            aspect_penalty: 600.0,
            contrast_penalty: 800.0,
        }
    }
}

/// Bright-region board boundary strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    pub blur_sigma: f64,
    /// Morphological close kernel side (forced odd).
    pub close_kernel: u32,
    /// Regions smaller than this fraction of the image are ignored.
    pub min_area_ratio: f64,
    /// Regions above this fraction of the image are down-weighted.
    pub max_area_fraction: f64,
    /// Score factor for regions touching three or more image borders.
    pub border_touch_penalty: f64,
    /// Score factor for oversized regions.
    pub oversize_penalty: f64,
    /// Initial polygon approximation tolerance, fraction of the hull perimeter.
    pub approx_eps_ratio: f64,
    pub approx_shrink: f64,
    pub approx_expand: f64,
    pub approx_iterations: usize,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            blur_sigma: 2.0,
            close_kernel: 7,
            min_area_ratio: 0.02,
            max_area_fraction: 0.97,
            border_touch_penalty: 0.35,
            oversize_penalty: 0.25,
            approx_eps_ratio: 0.02,
            approx_shrink: 0.7,
            approx_expand: 1.3,
            approx_iterations: 24,
        }
    }
}

/// Local re-fit of a candidate quadrilateral.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadRefineParams {
    pub enabled: bool,
    /// Crop padding as a fraction of the larger quad bounding-box side.
    pub pad_ratio: f64,
    pub pad_min_px: f64,
    /// Accepted centroid drift is `max(max_drift_factor * pad, max_drift_min_px)`.
    pub max_drift_factor: f64,
    pub max_drift_min_px: f64,
}

impl Default for QuadRefineParams {
    fn default() -> Self {
        Self {
            enabled: true,
            pad_ratio: 0.06,
            pad_min_px: 8.0,
            max_drift_factor: 1.5,
            max_drift_min_px: 40.0,
        }
    }
}

/// Size of the rectified board image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpParams {
    /// Minimum long side of the rectified image.
    pub min_dim: u32,
    /// Rectified images with a shorter side below this are upscaled.
    pub min_short_side: u32,
    /// Hard cap on either side.
    pub max_dim: u32,
}

impl Default for WarpParams {
    fn default() -> Self {
        Self {
            min_dim: 600,
            min_short_side: 700,
            max_dim: 4096,
        }
    }
}

/// Multi-threshold dark blob detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobParams {
    pub min_threshold: u32,
    pub max_threshold: u32,
    pub threshold_step: u32,
    /// Thresholds at which a blob must appear to be kept.
    pub min_repeatability: usize,
    pub min_dist_between_blobs: f64,
    pub min_area: f64,
    pub max_area: f64,
    pub min_circularity: f64,
    pub min_convexity: f64,
    pub min_inertia_ratio: f64,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            min_threshold: 10,
            max_threshold: 230,
            threshold_step: 10,
            min_repeatability: 2,
            min_dist_between_blobs: 8.0,
            min_area: 20.0,
            max_area: 60_000.0,
            min_circularity: 0.65,
            min_convexity: 0.85,
            min_inertia_ratio: 0.35,
        }
    }
}

/// Per-blob sub-pixel refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobRefineParams {
    pub enabled: bool,
    /// Window side as a multiple of the blob radius.
    pub win_scale: f64,
    /// Window bounds in pixels (forced odd).
    pub win_min: u32,
    pub win_max: u32,
    /// Blur kernel side (forced odd).
    pub blur_kernel: u32,
    /// Accept the refined center if it moved less than `radius * max(1, gate)`.
    pub gate: f64,
    /// Confidence assigned when the raw center is kept.
    pub raw_confidence: f64,
}

impl Default for BlobRefineParams {
    fn default() -> Self {
        Self {
            enabled: true,
            win_scale: 3.0,
            win_min: 15,
            win_max: 201,
            blur_kernel: 3,
            gate: 0.5,
            raw_confidence: 0.5,
        }
    }
}

/// Size classification and area-consistent selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// Window growth per iteration, as a fraction of the current width.
    pub relax_factor: f64,
    pub area_iterations: usize,
    /// Initial window half-width in MADs.
    pub mad_k: f64,
    /// Below this many small candidates the size split is considered implausible.
    pub min_small_plausible: usize,
    pub min_large_plausible: usize,
    /// Reassignment needs at least this many candidates in total.
    pub min_total_for_reassign: usize,
    /// Large dots are re-chosen among this many biggest blobs.
    pub reassign_pool: usize,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            relax_factor: 0.25,
            area_iterations: 12,
            mad_k: 2.5,
            min_small_plausible: 30,
            min_large_plausible: 2,
            min_total_for_reassign: 8,
            reassign_pool: 6,
        }
    }
}

/// Row clustering and quota correction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingParams {
    pub kmeans_iterations: usize,
    pub quota_passes: usize,
    /// Cost per row of distance between donor and target rows.
    pub row_jump_cost: f64,
}

impl Default for NumberingParams {
    fn default() -> Self {
        Self {
            kmeans_iterations: 100,
            quota_passes: 8,
            row_jump_cost: 1000.0,
        }
    }
}

/// Full detector configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub hough: HoughParams,
    pub quad: QuadScoreParams,
    pub region: RegionParams,
    pub refine_quad: QuadRefineParams,
    pub warp: WarpParams,
    pub blobs: BlobParams,
    pub blob_refine: BlobRefineParams,
    pub selection: SelectionParams,
    pub numbering: NumberingParams,
    /// Write per-stage PNGs to a temporary directory.
    pub debug_images: bool,
}

struct Fixer<'a> {
    warnings: &'a mut Vec<String>,
}

impl Fixer<'_> {
    fn positive(&mut self, name: &str, v: &mut f64, default: f64) {
        if !v.is_finite() || *v <= 0.0 {
            self.warnings
                .push(format!("{name}={v} must be positive; using {default}"));
            *v = default;
        }
    }

    fn non_negative(&mut self, name: &str, v: &mut f64, default: f64) {
        if !v.is_finite() || *v < 0.0 {
            self.warnings
                .push(format!("{name}={v} must be non-negative; using {default}"));
            *v = default;
        }
    }

    fn fraction(&mut self, name: &str, v: &mut f64, default: f64) {
        if !v.is_finite() || *v <= 0.0 || *v > 1.0 {
            self.warnings
                .push(format!("{name}={v} must be in (0, 1]; using {default}"));
            *v = default;
        }
    }

    fn at_least<T>(&mut self, name: &str, v: &mut T, min: T)
    where
        T: PartialOrd + Copy + std::fmt::Display,
    {
        if *v < min {
            self.warnings
                .push(format!("{name}={v} is below {min}; using {min}"));
            *v = min;
        }
    }

    fn odd(&mut self, name: &str, v: &mut u32) {
        if *v % 2 == 0 {
            self.warnings
                .push(format!("{name}={v} must be odd; using {}", *v + 1));
            *v += 1;
        }
    }

    fn ordered<T>(&mut self, lo_name: &str, lo: &mut T, hi_name: &str, hi: &mut T)
    where
        T: PartialOrd + Copy + std::fmt::Display,
    {
        if *lo > *hi {
            self.warnings
                .push(format!("{lo_name}={lo} exceeds {hi_name}={hi}; swapping"));
            std::mem::swap(lo, hi);
        }
    }
}

impl DetectionConfig {
    /// Repair invalid values, returning the fixed config and one warning per change.
    pub fn sanitize(mut self) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let mut f = Fixer {
            warnings: &mut warnings,
        };

        let d = HoughParams::default();
        let h = &mut self.hough;
        f.positive("hough.blur_sigma", &mut h.blur_sigma, d.blur_sigma);
        f.positive("hough.canny_low_ratio", &mut h.canny_low_ratio, d.canny_low_ratio);
        f.non_negative("hough.canny_low_min", &mut h.canny_low_min, d.canny_low_min);
        f.at_least("hough.canny_high_ratio", &mut h.canny_high_ratio, 1.0);
        f.at_least("hough.dilate_radius", &mut h.dilate_radius, 1);
        f.fraction("hough.vote_ratio", &mut h.vote_ratio, d.vote_ratio);
        f.fraction("hough.min_length_ratio", &mut h.min_length_ratio, d.min_length_ratio);
        f.fraction("hough.max_gap_ratio", &mut h.max_gap_ratio, d.max_gap_ratio);
        f.positive("hough.band_px", &mut h.band_px, d.band_px);
        f.fraction("hough.rho_nms_ratio", &mut h.rho_nms_ratio, d.rho_nms_ratio);
        f.positive("hough.angle_nms_deg", &mut h.angle_nms_deg, d.angle_nms_deg);
        f.at_least("hough.max_lines_per_group", &mut h.max_lines_per_group, 2);
        f.positive(
            "hough.orientation_tol_deg",
            &mut h.orientation_tol_deg,
            d.orientation_tol_deg,
        );
        f.positive(
            "hough.orthogonality_tol_deg",
            &mut h.orthogonality_tol_deg,
            d.orthogonality_tol_deg,
        );
        f.fraction(
            "hough.min_separation_ratio",
            &mut h.min_separation_ratio,
            d.min_separation_ratio,
        );

        let d = QuadScoreParams::default();
        let q = &mut self.quad;
        f.non_negative("quad.margin_px", &mut q.margin_px, d.margin_px);
        f.fraction("quad.min_area_ratio", &mut q.min_area_ratio, d.min_area_ratio);
        f.fraction("quad.max_area_ratio", &mut q.max_area_ratio, d.max_area_ratio);
        f.ordered(
            "quad.min_area_ratio",
            &mut q.min_area_ratio,
            "quad.max_area_ratio",
            &mut q.max_area_ratio,
        );
        f.positive("quad.aspect_min", &mut q.aspect_min, d.aspect_min);
        f.positive("quad.aspect_max", &mut q.aspect_max, d.aspect_max);
        f.ordered(
            "quad.aspect_min",
            &mut q.aspect_min,
            "quad.aspect_max",
            &mut q.aspect_max,
        );
        f.at_least("quad.edge_samples", &mut q.edge_samples, 4);
        f.positive("quad.edge_offset_px", &mut q.edge_offset_px, d.edge_offset_px);
        f.positive("quad.min_contrast", &mut q.min_contrast, d.min_contrast);
        f.non_negative("quad.contrast_weight", &mut q.contrast_weight, d.contrast_weight);
        f.non_negative("quad.area_bonus", &mut q.area_bonus, d.area_bonus);
        f.non_negative("quad.margin_penalty", &mut q.margin_penalty, d.margin_penalty);
        f.non_negative("quad.area_penalty", &mut q.area_penalty, d.area_penalty);
        f.non_negative("quad.aspect_penalty", &mut q.aspect_penalty, d.aspect_penalty);
        f.non_negative(
            "quad.contrast_penalty",
            &mut q.contrast_penalty,
            d.contrast_penalty,
        );

        let d = RegionParams::default();
        let r = &mut self.region;
        f.positive("region.blur_sigma", &mut r.blur_sigma, d.blur_sigma);
        f.at_least("region.close_kernel", &mut r.close_kernel, 1);
        f.odd("region.close_kernel", &mut r.close_kernel);
        f.fraction("region.min_area_ratio", &mut r.min_area_ratio, d.min_area_ratio);
        f.fraction(
            "region.max_area_fraction",
            &mut r.max_area_fraction,
            d.max_area_fraction,
        );
        f.fraction(
            "region.border_touch_penalty",
            &mut r.border_touch_penalty,
            d.border_touch_penalty,
        );
        f.fraction(
            "region.oversize_penalty",
            &mut r.oversize_penalty,
            d.oversize_penalty,
        );
        f.fraction(
            "region.approx_eps_ratio",
            &mut r.approx_eps_ratio,
            d.approx_eps_ratio,
        );
        f.fraction("region.approx_shrink", &mut r.approx_shrink, d.approx_shrink);
        if !r.approx_expand.is_finite() || r.approx_expand <= 1.0 {
            f.warnings.push(format!(
                "region.approx_expand={} must exceed 1; using {}",
                r.approx_expand, d.approx_expand
            ));
            r.approx_expand = d.approx_expand;
        }
        f.at_least("region.approx_iterations", &mut r.approx_iterations, 1);

        let d = QuadRefineParams::default();
        let qr = &mut self.refine_quad;
        f.fraction("refine_quad.pad_ratio", &mut qr.pad_ratio, d.pad_ratio);
        f.non_negative("refine_quad.pad_min_px", &mut qr.pad_min_px, d.pad_min_px);
        f.positive(
            "refine_quad.max_drift_factor",
            &mut qr.max_drift_factor,
            d.max_drift_factor,
        );
        f.non_negative(
            "refine_quad.max_drift_min_px",
            &mut qr.max_drift_min_px,
            d.max_drift_min_px,
        );

        let w = &mut self.warp;
        f.at_least("warp.min_dim", &mut w.min_dim, 16);
        f.at_least("warp.min_short_side", &mut w.min_short_side, 16);
        f.at_least("warp.max_dim", &mut w.max_dim, 64);
        f.ordered("warp.min_dim", &mut w.min_dim, "warp.max_dim", &mut w.max_dim);
        f.ordered(
            "warp.min_short_side",
            &mut w.min_short_side,
            "warp.max_dim",
            &mut w.max_dim,
        );

        let d = BlobParams::default();
        let b = &mut self.blobs;
        f.at_least("blobs.threshold_step", &mut b.threshold_step, 1);
        if b.max_threshold > 255 {
            f.warnings
                .push(format!("blobs.max_threshold={} exceeds 255; using 255", b.max_threshold));
            b.max_threshold = 255;
        }
        f.ordered(
            "blobs.min_threshold",
            &mut b.min_threshold,
            "blobs.max_threshold",
            &mut b.max_threshold,
        );
        f.at_least("blobs.min_repeatability", &mut b.min_repeatability, 1);
        f.non_negative(
            "blobs.min_dist_between_blobs",
            &mut b.min_dist_between_blobs,
            d.min_dist_between_blobs,
        );
        f.non_negative("blobs.min_area", &mut b.min_area, d.min_area);
        f.positive("blobs.max_area", &mut b.max_area, d.max_area);
        f.ordered("blobs.min_area", &mut b.min_area, "blobs.max_area", &mut b.max_area);
        f.fraction("blobs.min_circularity", &mut b.min_circularity, d.min_circularity);
        f.fraction("blobs.min_convexity", &mut b.min_convexity, d.min_convexity);
        f.fraction(
            "blobs.min_inertia_ratio",
            &mut b.min_inertia_ratio,
            d.min_inertia_ratio,
        );

        let d = BlobRefineParams::default();
        let br = &mut self.blob_refine;
        f.positive("blob_refine.win_scale", &mut br.win_scale, d.win_scale);
        f.at_least("blob_refine.win_min", &mut br.win_min, 5);
        f.odd("blob_refine.win_min", &mut br.win_min);
        f.odd("blob_refine.win_max", &mut br.win_max);
        f.ordered(
            "blob_refine.win_min",
            &mut br.win_min,
            "blob_refine.win_max",
            &mut br.win_max,
        );
        f.at_least("blob_refine.blur_kernel", &mut br.blur_kernel, 1);
        f.odd("blob_refine.blur_kernel", &mut br.blur_kernel);
        f.non_negative("blob_refine.gate", &mut br.gate, d.gate);
        f.fraction(
            "blob_refine.raw_confidence",
            &mut br.raw_confidence,
            d.raw_confidence,
        );

        let d = SelectionParams::default();
        let s = &mut self.selection;
        f.positive("selection.relax_factor", &mut s.relax_factor, d.relax_factor);
        f.at_least("selection.area_iterations", &mut s.area_iterations, 1);
        f.positive("selection.mad_k", &mut s.mad_k, d.mad_k);
        f.at_least("selection.reassign_pool", &mut s.reassign_pool, 4);

        let d = NumberingParams::default();
        let n = &mut self.numbering;
        f.at_least("numbering.kmeans_iterations", &mut n.kmeans_iterations, 1);
        f.at_least("numbering.quota_passes", &mut n.quota_passes, 1);
        f.positive("numbering.row_jump_cost", &mut n.row_jump_cost, d.row_jump_cost);

        (self, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_no_repair() {
        let (cfg, warnings) = DetectionConfig::default().sanitize();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        assert_eq!(cfg, DetectionConfig::default());
    }

    #[test]
    fn invalid_values_are_repaired_with_warnings() {
        let mut cfg = DetectionConfig::default();
        cfg.region.close_kernel = 6;
        cfg.hough.blur_sigma = -1.0;
        cfg.blobs.min_threshold = 200;
        cfg.blobs.max_threshold = 50;
        cfg.quad.min_contrast = f64::NAN;

        let (fixed, warnings) = cfg.sanitize();
        assert_eq!(fixed.region.close_kernel, 7);
        assert_eq!(fixed.hough.blur_sigma, HoughParams::default().blur_sigma);
        assert_eq!(fixed.blobs.min_threshold, 50);
        assert_eq!(fixed.blobs.max_threshold, 200);
        assert_eq!(fixed.quad.min_contrast, QuadScoreParams::default().min_contrast);
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("region.close_kernel")));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: DetectionConfig =
            serde_json::from_str(r#"{"warp": {"min_dim": 800}, "debug_images": true}"#)
                .expect("parse");
        assert_eq!(cfg.warp.min_dim, 800);
        assert_eq!(cfg.warp.min_short_side, WarpParams::default().min_short_side);
        assert!(cfg.debug_images);
        assert_eq!(cfg.blobs, BlobParams::default());
    }
}
