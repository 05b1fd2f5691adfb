use crate::backproject::back_project;
use crate::blobs::{detect_blobs, refine_blobs};
use crate::board::BoardSpec;
use crate::boundary::{detect_board_boundary, BoardQuad};
use crate::classify::{classify_sizes, SizeClasses};
use crate::config::DetectionConfig;
use crate::debug::DebugSink;
use crate::error::DetectionError;
use crate::numbering::{number_board, NumberingResult};
use crate::raster::to_luma;
use crate::rectify::{rectify, Rectified};
use crate::result::DetectionResult;
use dotboard_core::GrayImageView;
use log::{debug, info, warn};
use nalgebra::{Point2, Point3};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest image side the pipeline accepts.
const MIN_IMAGE_SIDE: usize = 32;

/// Every intermediate product of a successful detection.
#[derive(Clone, Debug)]
pub struct BoardDetection {
    pub quad: BoardQuad,
    pub rectified: Rectified,
    pub classes: SizeClasses,
    pub numbering: NumberingResult,
    /// Small-dot centers in input pixels, in logical order.
    pub image_points: Vec<Point2<f64>>,
    pub object_points: Vec<Point3<f64>>,
    pub point_radii: Vec<f64>,
    pub big_circle_points: Vec<Point2<f64>>,
    pub big_circle_radii: Vec<f64>,
}

/// Detector for the asymmetric dot board.
///
/// The configuration is sanitized once at construction and read-only
/// afterwards, so one detector can be shared across threads.
#[derive(Clone, Debug)]
pub struct DotBoardDetector {
    board: BoardSpec,
    config: DetectionConfig,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl DotBoardDetector {
    pub fn new(board: BoardSpec, config: DetectionConfig) -> Self {
        let (config, warnings) = config.sanitize();
        for w in &warnings {
            warn!("detection config: {w}");
        }
        Self { board, config }
    }

    #[inline]
    pub fn board(&self) -> &BoardSpec {
        &self.board
    }

    #[inline]
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detect the board and collapse the outcome into a [`DetectionResult`].
    ///
    /// Never panics: stage errors and panics inside the pipeline both become
    /// `success == false` with a `"<stage>: <reason> (image WxH)"` message.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image), fields(width = image.width, height = image.height))
    )]
    pub fn detect(&self, image: &GrayImageView<'_>, name: &str) -> DetectionResult {
        let start = Instant::now();
        let size = (image.width, image.height);
        let sink = if self.config.debug_images {
            DebugSink::create()
        } else {
            DebugSink::disabled()
        };
        let stage = Cell::new("input");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(image, &sink, &stage)));
        let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
        let debug_dir = sink.dir().map(|d| d.to_path_buf());

        let mut result = match outcome {
            Ok(Ok(det)) => {
                info!("{name}: board detected in {elapsed_ms:.0} ms");
                DetectionResult {
                    name: name.to_string(),
                    success: true,
                    message: "ok".to_string(),
                    image_size: size,
                    image_points: det.image_points,
                    object_points: det.object_points,
                    point_radii: det.point_radii,
                    big_circle_points: det.big_circle_points,
                    big_circle_radii: det.big_circle_radii,
                    logical_indices: det.numbering.indices,
                    board_quad: Some(det.quad),
                    ..DetectionResult::default()
                }
            }
            Ok(Err(err)) => {
                let message = format!("{}: {err} (image {}x{})", err.stage(), size.0, size.1);
                warn!("{name}: {message}");
                DetectionResult::failure(name, size, message)
            }
            Err(payload) => {
                let message = format!(
                    "{}: internal error: {} (image {}x{})",
                    stage.get(),
                    panic_message(payload.as_ref()),
                    size.0,
                    size.1
                );
                warn!("{name}: {message}");
                DetectionResult::failure(name, size, message)
            }
        };
        result.elapsed_ms = elapsed_ms;
        result.debug_dir = debug_dir;
        result
    }

    /// Run the pipeline and keep every intermediate product.
    pub fn detect_board(
        &self,
        image: &GrayImageView<'_>,
    ) -> Result<BoardDetection, DetectionError> {
        self.run(image, &DebugSink::disabled(), &Cell::new("input"))
    }

    fn run(
        &self,
        image: &GrayImageView<'_>,
        sink: &DebugSink,
        stage: &Cell<&'static str>,
    ) -> Result<BoardDetection, DetectionError> {
        let cfg = &self.config;
        if !image.is_valid() {
            return Err(DetectionError::InvalidImage(format!(
                "{} bytes for {}x{}",
                image.data.len(),
                image.width,
                image.height
            )));
        }
        if image.width.min(image.height) < MIN_IMAGE_SIDE {
            return Err(DetectionError::InvalidImage(format!(
                "image sides must be at least {MIN_IMAGE_SIDE} px"
            )));
        }

        stage.set("board-boundary");
        let gray = to_luma(image);
        sink.save_luma("00_input", &gray);
        let quad = detect_board_boundary(&gray, cfg, sink)?;
        sink.save_quad("00_input_quad", &gray, &quad.corners);
        debug!("board quad from {:?}, score {:.1}", quad.source, quad.score);

        stage.set("rectify");
        let rectified = rectify(image, &quad.corners, &cfg.warp)?;
        sink.save_gray("03_rectified", &rectified.image);

        stage.set("blobs");
        let rect_luma = to_luma(&rectified.image.view());
        let raw = detect_blobs(&rect_luma, &cfg.blobs);
        let refined = refine_blobs(&rect_luma, &raw, &cfg.blob_refine);
        let classes = classify_sizes(&refined, &cfg.selection)?;
        let as_dots = |blobs: &[crate::blobs::RefinedBlob]| -> Vec<(Point2<f64>, f64)> {
            blobs.iter().map(|b| (b.center, b.radius)).collect()
        };
        sink.save_dots(
            "04_blobs",
            &rectified.image,
            &as_dots(&classes.small),
            &as_dots(&classes.large),
        );

        stage.set("numbering");
        let small: Vec<Point2<f64>> = classes.small.iter().map(|b| b.center).collect();
        let large: Vec<Point2<f64>> = classes.large.iter().map(|b| b.center).collect();
        let size = (rectified.image.width, rectified.image.height);
        let numbering = number_board(&small, &large, size, &cfg.numbering)?;

        stage.set("back-projection");
        let radii: Vec<f64> = numbering
            .source
            .iter()
            .map(|&i| classes.small[i].radius)
            .collect();
        let dots = back_project(&rectified.h_img_from_rect, &numbering.points, &radii)?;
        let large_radii: Vec<f64> = classes.large.iter().map(|b| b.radius).collect();
        let big = back_project(&rectified.h_img_from_rect, &large, &large_radii)?;
        let object_points = numbering
            .indices
            .iter()
            .map(|&idx| self.board.object_point(idx))
            .collect();

        Ok(BoardDetection {
            quad,
            rectified,
            classes,
            numbering,
            image_points: dots.points,
            object_points,
            point_radii: dots.radii,
            big_circle_points: big.points,
            big_circle_radii: big.radii,
        })
    }
}
