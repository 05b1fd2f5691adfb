//! Detector for the asymmetric 7x6 dot board.
//!
//! ## Quickstart
//!
//! ```
//! use dotboard_core::GrayImage;
//! use dotboard_detect::{BoardSpec, DetectionConfig, DotBoardDetector};
//!
//! let detector = DotBoardDetector::new(BoardSpec::default(), DetectionConfig::default());
//! let image = GrayImage::filled(320, 240, 255);
//! let result = detector.detect(&image.view(), "blank");
//! assert!(!result.success);
//! ```
//!
//! Pipeline:
//! 1. Locate the board outline (line pairs and bright regions, locally refined).
//! 2. Warp the outline to an upright rectangle.
//! 3. Detect dark discs with a threshold sweep and refine each locally.
//! 4. Split discs into 41 small grid dots and 4 large orientation dots.
//! 5. Number the small dots in the frame set by the large ones.
//! 6. Map the numbered dots back into the input image.

mod backproject;
mod blobs;
mod board;
mod boundary;
mod classify;
mod config;
mod debug;
mod detector;
mod error;
mod numbering;
mod raster;
mod rectify;
mod result;
pub mod synthetic;

pub use backproject::{back_project, ImageDots};
pub use blobs::{detect_blobs, refine_blobs, RawBlob, RefinedBlob};
pub use board::{
    BoardError, BoardSpec, LogicalIndex, GRID_COLS, GRID_ROWS, LARGE_DOT_COUNT, MISSING_COL,
    MISSING_ROW, ROW_QUOTAS, SMALL_DOT_COUNT,
};
pub use boundary::{
    detect_board_boundary, edge_contrast, is_valid_score, quad_score, BoardQuad, QuadSource,
    HARD_FAIL, SCORE_FLOOR,
};
pub use classify::{classify_sizes, select_by_area, SizeClasses};
pub use config::{
    BlobParams, BlobRefineParams, DetectionConfig, HoughParams, NumberingParams,
    QuadRefineParams, QuadScoreParams, RegionParams, SelectionParams, WarpParams,
};
pub use debug::DebugSink;
pub use detector::{BoardDetection, DotBoardDetector};
pub use error::{DetectionError, NumberingFailure};
pub use numbering::{number_board, BoardAxes, NumberingResult};
pub use raster::luma_view;
pub use rectify::{rectify, Rectified};
pub use result::{BoardPose, DetectionResiduals, DetectionResult};
