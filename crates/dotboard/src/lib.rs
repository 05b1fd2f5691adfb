//! High-level facade for the `dotboard-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core, detection and calibration crates
//! - helpers that run the detector directly on `image` buffers
//! - the `dotboard` command-line tool (feature `cli`)
//!
//! ## Quickstart
//!
//! ```no_run
//! use dotboard::{detect_image, BoardSpec, DetectionConfig, DotBoardDetector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let img = image::open("board.png")?;
//! let detector = DotBoardDetector::new(BoardSpec::default(), DetectionConfig::default());
//! let result = detect_image(&detector, &img, "board.png");
//! println!("{}: {}", result.name, result.message);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `dotboard::core`: gray images, homographies, geometry, statistics, k-means.
//! - `dotboard::detect`: board model and the single-image detection pipeline.
//! - `dotboard::calib`: camera model, calibration with outlier rejection,
//!   batch runner and JSON report.

pub use dotboard_calib as calib;
pub use dotboard_core as core;
pub use dotboard_detect as detect;

pub use dotboard_calib::{
    calibrate_detections, run_calibration, run_directory, CalibrationConfig, CalibrationError,
    CalibrationOutput, CalibrationReport, CameraModel, DistortionModel, NamedImage, RunConfig,
};
pub use dotboard_core::{GrayImage, GrayImageView};
pub use dotboard_detect::{
    BoardSpec, DetectionConfig, DetectionError, DetectionResult, DotBoardDetector, LogicalIndex,
};

/// Borrow an `image::GrayImage` as a core view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    dotboard_detect::luma_view(img)
}

/// Convert any decoded image to an owned 8-bit gray image.
pub fn to_gray(img: &::image::DynamicImage) -> GrayImage {
    let luma = img.to_luma8();
    GrayImage {
        width: luma.width() as usize,
        height: luma.height() as usize,
        data: luma.into_raw(),
    }
}

/// Run `detector` on a decoded image of any pixel format.
pub fn detect_image(
    detector: &DotBoardDetector,
    img: &::image::DynamicImage,
    name: &str,
) -> DetectionResult {
    match img {
        ::image::DynamicImage::ImageLuma8(gray) => detector.detect(&gray_view(gray), name),
        other => detector.detect(&to_gray(other).view(), name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_color_images_to_gray() {
        let rgb = ::image::RgbImage::from_pixel(4, 3, ::image::Rgb([200, 200, 200]));
        let gray = to_gray(&::image::DynamicImage::ImageRgb8(rgb));
        assert_eq!((gray.width, gray.height), (4, 3));
        assert!(gray.data.iter().all(|&v| v == 200));
    }

    #[test]
    fn detect_image_reports_the_name() {
        let detector = DotBoardDetector::new(BoardSpec::default(), DetectionConfig::default());
        let img = ::image::DynamicImage::ImageLuma8(::image::GrayImage::new(64, 64));
        let result = detect_image(&detector, &img, "dark.png");
        assert_eq!(result.name, "dark.png");
        assert!(!result.success);
    }
}
