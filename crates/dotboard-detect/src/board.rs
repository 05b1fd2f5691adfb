//! Physical description of the asymmetric dot board.
//!
//! The board carries a 7 x 6 grid of small dots with the cell at row 3,
//! column 3 left empty (41 dots), plus four large orientation dots outside
//! the grid corners. Three large dots sit on the corners of a rectangle;
//! the top-left one is pushed further out so the layout has no rotational
//! symmetry.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

pub const GRID_ROWS: usize = 7;
pub const GRID_COLS: usize = 6;
/// Row holding the empty cell.
pub const MISSING_ROW: usize = 3;
/// Column of the empty cell within [`MISSING_ROW`].
pub const MISSING_COL: usize = 3;
/// Number of small dots per row, top to bottom.
pub const ROW_QUOTAS: [usize; GRID_ROWS] = [6, 6, 6, 5, 6, 6, 6];
pub const SMALL_DOT_COUNT: usize = 41;
pub const LARGE_DOT_COUNT: usize = 4;

/// Large-dot centers in grid units (spacing = 1), printed frame with y down.
/// Order: top-left, top-right, bottom-right, bottom-left.
pub const LARGE_DOT_GRID: [[f64; 2]; 4] = [[-1.5, -1.5], [5.8, -0.8], [5.8, 6.8], [-0.8, 6.8]];
/// Large-dot diameter as a multiple of the small-dot diameter.
pub const LARGE_DOT_SCALE: f64 = 2.0;
/// Paper outline in grid units: left, top, right, bottom.
pub const BOARD_EXTENT_GRID: [f64; 4] = [-2.4, -2.4, 6.9, 7.9];

/// Logical grid position of a small dot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalIndex {
    pub row: u32,
    pub col: u32,
}

impl LogicalIndex {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("dot diameter must be positive and finite (got {0})")]
    InvalidDiameter(f64),
    #[error("dot spacing must be positive and finite (got {0})")]
    InvalidSpacing(f64),
    #[error("dot diameter {diameter} mm does not fit the spacing {spacing} mm")]
    Overlapping { diameter: f64, spacing: f64 },
}

/// Metric board description.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSpec {
    /// Small-dot diameter in millimetres.
    pub small_diameter_mm: f64,
    /// Center-to-center spacing of the small dots in millimetres.
    pub spacing_mm: f64,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            small_diameter_mm: 10.0,
            spacing_mm: 25.0,
        }
    }
}

impl BoardSpec {
    pub fn new(small_diameter_mm: f64, spacing_mm: f64) -> Result<Self, BoardError> {
        let spec = Self {
            small_diameter_mm,
            spacing_mm,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), BoardError> {
        if !self.small_diameter_mm.is_finite() || self.small_diameter_mm <= 0.0 {
            return Err(BoardError::InvalidDiameter(self.small_diameter_mm));
        }
        if !self.spacing_mm.is_finite() || self.spacing_mm <= 0.0 {
            return Err(BoardError::InvalidSpacing(self.spacing_mm));
        }
        if self.small_diameter_mm >= self.spacing_mm {
            return Err(BoardError::Overlapping {
                diameter: self.small_diameter_mm,
                spacing: self.spacing_mm,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn expected_circle_count(&self) -> usize {
        SMALL_DOT_COUNT
    }

    pub fn large_diameter_mm(&self) -> f64 {
        self.small_diameter_mm * LARGE_DOT_SCALE
    }

    /// All logical indices in ascending `(row, col)` order, skipping the empty cell.
    pub fn logical_indices() -> Vec<LogicalIndex> {
        (0..GRID_ROWS)
            .flat_map(|r| (0..GRID_COLS).map(move |c| (r, c)))
            .filter(|&(r, c)| !(r == MISSING_ROW && c == MISSING_COL))
            .map(|(r, c)| LogicalIndex::new(r as u32, c as u32))
            .collect()
    }

    /// Object point of a logical index: `x = col * spacing`,
    /// `y = (6 - row) * spacing`, `z = 0`.
    pub fn object_point(&self, idx: LogicalIndex) -> Point3<f64> {
        let y_rows = (GRID_ROWS as f64 - 1.0) - idx.row as f64;
        Point3::new(
            idx.col as f64 * self.spacing_mm,
            y_rows * self.spacing_mm,
            0.0,
        )
    }

    /// Object points for the first `count` logical indices (at most 41).
    pub fn build_object_points(&self, count: usize) -> Vec<Point3<f64>> {
        Self::logical_indices()
            .into_iter()
            .take(count)
            .map(|idx| self.object_point(idx))
            .collect()
    }

    /// Small-dot center in the printed frame (millimetres, y down).
    pub fn printed_small_center(&self, idx: LogicalIndex) -> Point2<f64> {
        Point2::new(
            idx.col as f64 * self.spacing_mm,
            idx.row as f64 * self.spacing_mm,
        )
    }

    /// Large-dot centers in the printed frame (millimetres, y down),
    /// ordered top-left, top-right, bottom-right, bottom-left.
    pub fn printed_large_centers(&self) -> [Point2<f64>; 4] {
        LARGE_DOT_GRID.map(|[x, y]| Point2::new(x * self.spacing_mm, y * self.spacing_mm))
    }

    /// Paper outline corners in the printed frame, clockwise from top-left.
    pub fn printed_outline(&self) -> [Point2<f64>; 4] {
        let s = self.spacing_mm;
        let [l, t, r, b] = BOARD_EXTENT_GRID;
        [
            Point2::new(l * s, t * s),
            Point2::new(r * s, t * s),
            Point2::new(r * s, b * s),
            Point2::new(l * s, b * s),
        ]
    }
}
