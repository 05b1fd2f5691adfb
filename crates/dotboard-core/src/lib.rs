//! Core types and utilities for dot-board calibration.
//!
//! This crate is small and purely numeric: a borrowed/owned grayscale image
//! type with sub-pixel sampling, planar homographies, line and polygon
//! geometry, robust statistics, deterministic k-means and an intensity histogram.
//! It does not depend on any image codec or detector.

mod geometry;
mod homography;
mod image;
mod kmeans;
mod logger;
mod stats;
mod threshold;

pub use geometry::{
    centroid, convex_hull, is_convex, order_quad_corners, order_quad_cyclic,
    orientation_difference, perimeter, point_in_polygon, polygon_area, signed_polygon_area,
    simplify_closed_polygon, Line2, PolygonMoments,
};
pub use homography::{estimate_homography, homography_from_4pt, warp_perspective_gray, Homography};
pub use image::{
    sample_bicubic, sample_bilinear, sample_bilinear_checked, sample_bilinear_u8, GrayImage,
    GrayImageView,
};
pub use kmeans::{kmeans_1d, kmeans_farthest, kmeans_from_seeds, KMeans};
pub use stats::{mad, max, mean, median, percentile, rms, std_dev};
pub use threshold::Histogram;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
