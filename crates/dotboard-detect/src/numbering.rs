//! Assigns a logical (row, col) to each of the 41 small dots.
//!
//! The four large dots fix a board frame that does not depend on how the
//! board is rotated in the rectified image. Small dots are projected into
//! that frame, clustered into seven rows, and rows are rebalanced until each
//! holds its expected number of dots. Within a row, dots are ordered along
//! the frame's x axis; the gapped row skips the empty column.

use crate::board::{
    LogicalIndex, GRID_ROWS, MISSING_COL, MISSING_ROW, ROW_QUOTAS, SMALL_DOT_COUNT,
};
use crate::config::NumberingParams;
use crate::error::NumberingFailure;
use dotboard_core::kmeans_1d;
use log::{debug, trace};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Board-local frame anchored at the bottom-right large dot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardAxes {
    pub origin: Point2<f64>,
    pub x_hat: Vector2<f64>,
    pub y_hat: Vector2<f64>,
    /// False when the frame fell back to image axes.
    pub from_markers: bool,
}

fn interior_angle(at: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let (u, v) = (a - at, b - at);
    let denom = u.norm() * v.norm();
    if denom < 1e-12 {
        return 0.0;
    }
    (u.dot(&v) / denom).clamp(-1.0, 1.0).acos()
}

impl BoardAxes {
    /// Image-aligned frame centered on the rectified image.
    pub fn image_aligned(image_size: (usize, usize)) -> Self {
        Self {
            origin: Point2::new(image_size.0 as f64 * 0.5, image_size.1 as f64 * 0.5),
            x_hat: Vector2::x(),
            y_hat: Vector2::y(),
            from_markers: false,
        }
    }

    /// Frame from the four large dots, or the image-aligned fallback.
    pub fn from_markers(large: &[Point2<f64>], image_size: (usize, usize)) -> Self {
        let Ok(markers) = <[Point2<f64>; 4]>::try_from(large) else {
            return Self::image_aligned(image_size);
        };

        // The outer corner dot is the one farthest from the other three.
        let spread = |i: usize| -> f64 { markers.iter().map(|m| (m - markers[i]).norm()).sum() };
        let Some(top_left) = (0..4).max_by(|&a, &b| spread(a).total_cmp(&spread(b))) else {
            return Self::image_aligned(image_size);
        };
        let rest: Vec<Point2<f64>> = (0..4).filter(|&i| i != top_left).map(|i| markers[i]).collect();

        let right_angle_error = |i: usize| {
            let (a, b) = (rest[(i + 1) % 3], rest[(i + 2) % 3]);
            (interior_angle(rest[i], a, b) - std::f64::consts::FRAC_PI_2).abs()
        };
        let Some(br) = (0..3).min_by(|&a, &b| right_angle_error(a).total_cmp(&right_angle_error(b)))
        else {
            return Self::image_aligned(image_size);
        };
        let origin = rest[br];
        let (mut a, mut b) = (rest[(br + 1) % 3], rest[(br + 2) % 3]);

        let (Some(mut x_hat), Some(mut y_hat)) =
            ((origin - a).try_normalize(1e-12), (origin - b).try_normalize(1e-12))
        else {
            return Self::image_aligned(image_size);
        };
        if x_hat.perp(&y_hat) < 0.0 {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut x_hat, &mut y_hat);
        }
        trace!("markers: origin {origin:?}, along x from {a:?}, along y from {b:?}");

        let Some(y_ortho) = (y_hat - x_hat * x_hat.dot(&y_hat)).try_normalize(1e-12) else {
            return Self::image_aligned(image_size);
        };
        Self {
            origin,
            x_hat,
            y_hat: y_ortho,
            from_markers: true,
        }
    }

    /// Coordinates `(u, v)` of `p` in the board frame.
    #[inline]
    pub fn project(&self, p: Point2<f64>) -> (f64, f64) {
        let rel = p - self.origin;
        (rel.dot(&self.x_hat), rel.dot(&self.y_hat))
    }
}

/// Small dots in logical order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumberingResult {
    /// Dot centers sorted by `(row, col)`.
    pub points: Vec<Point2<f64>>,
    pub indices: Vec<LogicalIndex>,
    /// Position of each output dot in the input slice.
    pub source: Vec<usize>,
    pub axes: BoardAxes,
}

fn row_centers(v: &[f64], rows: &[usize]) -> [f64; GRID_ROWS] {
    let mut sum = [0.0; GRID_ROWS];
    let mut count = [0usize; GRID_ROWS];
    for (&vi, &r) in v.iter().zip(rows) {
        sum[r] += vi;
        count[r] += 1;
    }
    let mut centers = [0.0; GRID_ROWS];
    for r in 0..GRID_ROWS {
        centers[r] = if count[r] > 0 { sum[r] / count[r] as f64 } else { f64::NAN };
    }
    centers
}

fn row_counts(rows: &[usize]) -> [usize; GRID_ROWS] {
    let mut counts = [0; GRID_ROWS];
    for &r in rows {
        counts[r] += 1;
    }
    counts
}

/// Cheapest move of one dot from an over-full row into an under-full one.
///
/// Moving between distant rows costs `row_jump_cost` per row crossed, which
/// dominates the distance to the target row center. When `target` is given
/// only moves into that row are considered; otherwise `donor` restricts the
/// source row.
fn best_move(
    v: &[f64],
    rows: &[usize],
    centers: &[f64; GRID_ROWS],
    target: Option<usize>,
    donor: Option<usize>,
    jump_cost: f64,
) -> Option<(usize, usize)> {
    let counts = row_counts(rows);
    let mut best: Option<(usize, usize, f64)> = None;
    for (i, (&vi, &d)) in v.iter().zip(rows).enumerate() {
        if counts[d] <= ROW_QUOTAS[d] || donor.is_some_and(|want| want != d) {
            continue;
        }
        for t in 0..GRID_ROWS {
            if counts[t] >= ROW_QUOTAS[t] || target.is_some_and(|want| want != t) {
                continue;
            }
            let center = if centers[t].is_finite() { centers[t] } else { vi };
            let cost = jump_cost * d.abs_diff(t) as f64 + (vi - center).abs();
            if best.is_none_or(|(_, _, c)| cost < c) {
                best = Some((i, t, cost));
            }
        }
    }
    best.map(|(i, t, _)| (i, t))
}

/// Rebalance row labels towards [`ROW_QUOTAS`]; returns the number of passes run.
pub(crate) fn correct_row_quotas(
    v: &[f64],
    rows: &mut [usize],
    max_passes: usize,
    jump_cost: f64,
) -> usize {
    let mut passes = 0;
    for _ in 0..max_passes {
        passes += 1;
        let centers = row_centers(v, rows);
        let mut moved = 0usize;

        // Fill every short row from the cheapest over-full donor.
        for t in 0..GRID_ROWS {
            while row_counts(rows)[t] < ROW_QUOTAS[t] {
                let Some((i, to)) = best_move(v, rows, &centers, Some(t), None, jump_cost) else {
                    break;
                };
                rows[i] = to;
                moved += 1;
            }
        }
        // Drain every over-full row into the cheapest short target.
        for d in 0..GRID_ROWS {
            while row_counts(rows)[d] > ROW_QUOTAS[d] {
                let Some((i, to)) = best_move(v, rows, &centers, None, Some(d), jump_cost) else {
                    break;
                };
                rows[i] = to;
                moved += 1;
            }
        }

        trace!("quota pass {passes}: {moved} moves");
        if moved == 0 {
            break;
        }
    }
    passes
}

/// Number the small dots.
///
/// `small` must hold exactly the 41 grid dots; `large` should hold the four
/// orientation dots (any other count falls back to image axes).
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn number_board(
    small: &[Point2<f64>],
    large: &[Point2<f64>],
    image_size: (usize, usize),
    p: &NumberingParams,
) -> Result<NumberingResult, NumberingFailure> {
    if small.len() < GRID_ROWS {
        return Err(NumberingFailure::NotEnoughCandidates);
    }
    if small.len() != SMALL_DOT_COUNT {
        return Err(NumberingFailure::CandidateCountMismatch);
    }

    let axes = BoardAxes::from_markers(large, image_size);
    let uv: Vec<(f64, f64)> = small.iter().map(|&q| axes.project(q)).collect();
    let v: Vec<f64> = uv.iter().map(|&(_, v)| v).collect();

    let km = kmeans_1d(&v, GRID_ROWS, p.kmeans_iterations).ok_or(NumberingFailure::KmeansFailed)?;
    let mut order: Vec<usize> = (0..GRID_ROWS).collect();
    order.sort_by(|&a, &b| km.centers[a][0].total_cmp(&km.centers[b][0]));
    let mut rank = [usize::MAX; GRID_ROWS];
    for (r, &label) in order.iter().enumerate() {
        rank[label] = r;
    }
    // k-means labels are always below GRID_ROWS; kept as a guard on the
    // clustering contract.
    let mut rows = km
        .labels
        .iter()
        .map(|&l| rank.get(l).copied().filter(|&r| r < GRID_ROWS))
        .collect::<Option<Vec<usize>>>()
        .ok_or(NumberingFailure::InvalidRowLabel)?;

    let passes = correct_row_quotas(&v, &mut rows, p.quota_passes, p.row_jump_cost);
    let counts = row_counts(&rows);
    debug!("row sizes {counts:?} after {passes} quota passes");

    let short_rows = counts.iter().filter(|&&c| c == ROW_QUOTAS[MISSING_ROW]).count();
    if short_rows != 1 {
        return Err(NumberingFailure::MissingCenterRowNotUnique);
    }
    if counts != ROW_QUOTAS {
        return Err(NumberingFailure::RowSizeMismatch);
    }

    let mut ordered: Vec<(LogicalIndex, usize)> = Vec::with_capacity(SMALL_DOT_COUNT);
    for row in 0..GRID_ROWS {
        let mut members: Vec<usize> = (0..small.len()).filter(|&i| rows[i] == row).collect();
        members.sort_by(|&a, &b| uv[a].0.total_cmp(&uv[b].0));
        for (k, &i) in members.iter().enumerate() {
            let col = if row == MISSING_ROW && k >= MISSING_COL { k + 1 } else { k };
            ordered.push((LogicalIndex::new(row as u32, col as u32), i));
        }
    }
    // Unreachable once every row matches its quota, since columns within a
    // row are distinct.
    ordered.sort();
    ordered.dedup_by_key(|(idx, _)| *idx);
    if ordered.len() != SMALL_DOT_COUNT {
        return Err(NumberingFailure::OrderedSizeMismatch);
    }

    Ok(NumberingResult {
        points: ordered.iter().map(|&(_, i)| small[i]).collect(),
        indices: ordered.iter().map(|&(idx, _)| idx).collect(),
        source: ordered.iter().map(|&(_, i)| i).collect(),
        axes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardSpec, LARGE_DOT_GRID};
    use nalgebra::Rotation2;

    const SPACING: f64 = 40.0;

    /// Dots in the printed layout, optionally rotated about the grid center.
    fn layout(angle: f64) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
        let rot = Rotation2::new(angle);
        let center = Vector2::new(2.5, 3.0);
        let offset = Vector2::new(120.0, 110.0);
        let place = |x: f64, y: f64| {
            Point2::from(rot * (Vector2::new(x, y) - center) * SPACING + center * SPACING + offset)
        };
        let small = BoardSpec::logical_indices()
            .into_iter()
            .map(|idx| place(idx.col as f64, idx.row as f64))
            .collect();
        let large = LARGE_DOT_GRID.iter().map(|g| place(g[0], g[1])).collect();
        (small, large)
    }

    fn shuffled(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        // Deterministic interleave so the input order carries no row information.
        let mut out: Vec<Point2<f64>> = points.iter().step_by(2).copied().collect();
        out.extend(points.iter().skip(1).step_by(2).rev().copied());
        out
    }

    fn check_complete(res: &NumberingResult) {
        assert_eq!(res.indices, BoardSpec::logical_indices());
        assert_eq!(res.points.len(), SMALL_DOT_COUNT);
    }

    #[test]
    fn numbers_upright_board() {
        let (small, large) = layout(0.0);
        let res = number_board(&shuffled(&small), &large, (800, 700), &NumberingParams::default())
            .expect("numbered");
        check_complete(&res);
        assert!(res.axes.from_markers);
        for (pt, expected) in res.points.iter().zip(&small) {
            assert!((pt - expected).norm() < 1e-9, "{pt:?} vs {expected:?}");
        }
    }

    #[test]
    fn numbering_follows_board_rotation() {
        for quarter in 1..4 {
            let angle = quarter as f64 * std::f64::consts::FRAC_PI_2 + 0.05;
            let (small, large) = layout(angle);
            let res = number_board(&shuffled(&small), &large, (800, 800), &NumberingParams::default())
                .expect("numbered");
            check_complete(&res);
            for (pt, expected) in res.points.iter().zip(&small) {
                assert!((pt - expected).norm() < 1e-9, "rotation {quarter}: {pt:?} vs {expected:?}");
            }
        }
    }

    #[test]
    fn source_indices_point_back_into_input() {
        let (small, large) = layout(0.2);
        let input = shuffled(&small);
        let res = number_board(&input, &large, (800, 800), &NumberingParams::default()).expect("numbered");
        for (pt, &i) in res.points.iter().zip(&res.source) {
            assert_eq!(*pt, input[i]);
        }
    }

    #[test]
    fn falls_back_to_image_axes_without_markers() {
        let (small, _) = layout(0.0);
        let res = number_board(&small, &[], (800, 700), &NumberingParams::default()).expect("numbered");
        assert!(!res.axes.from_markers);
        check_complete(&res);
        assert!((res.points[0] - small[0]).norm() < 1e-9);
    }

    #[test]
    fn wrong_count_is_rejected() {
        let (small, large) = layout(0.0);
        let err = number_board(&small[..40], &large, (800, 700), &NumberingParams::default())
            .unwrap_err();
        assert_eq!(err, NumberingFailure::CandidateCountMismatch);
        let err = number_board(&small[..3], &large, (800, 700), &NumberingParams::default())
            .unwrap_err();
        assert_eq!(err, NumberingFailure::NotEnoughCandidates);
    }

    fn no_quota_passes() -> NumberingParams {
        NumberingParams {
            quota_passes: 0,
            ..NumberingParams::default()
        }
    }

    #[test]
    fn non_finite_center_fails_clustering() {
        let (mut small, large) = layout(0.0);
        small[7] = Point2::new(f64::NAN, 200.0);
        let err = number_board(&small, &large, (800, 700), &NumberingParams::default())
            .unwrap_err();
        assert_eq!(err, NumberingFailure::KmeansFailed);
        assert_eq!(err.as_str(), "kmeans_failed");
    }

    #[test]
    fn two_short_rows_are_rejected_without_quota_passes() {
        // Dot (0,0) drawn on row 1 leaves rows 0 and 3 both with five dots.
        let (mut small, large) = layout(0.0);
        small[0] = small[6];
        let err = number_board(&small, &large, (800, 700), &no_quota_passes()).unwrap_err();
        assert_eq!(err, NumberingFailure::MissingCenterRowNotUnique);
        assert_eq!(err.as_str(), "missing_center_row_not_unique");

        let res = number_board(&small, &large, (800, 700), &NumberingParams::default())
            .expect("quota passes move the dot back to row 0");
        check_complete(&res);
    }

    #[test]
    fn unbalanced_rows_are_rejected_without_quota_passes() {
        // Dot (0,0) drawn on row 3 gives row sizes 5,6,6,6,6,6,6.
        let (mut small, large) = layout(0.0);
        small[0] = small[18];
        let err = number_board(&small, &large, (800, 700), &no_quota_passes()).unwrap_err();
        assert_eq!(err, NumberingFailure::RowSizeMismatch);
        assert_eq!(err.as_str(), "row_size_mismatch");
    }

    #[test]
    fn quota_correction_prefers_adjacent_rows() {
        // Row values 0..6, one dot of row 2 mislabeled into row 3 and one of
        // row 5 into row 6.
        let mut v = Vec::new();
        let mut rows = Vec::new();
        for (r, &q) in ROW_QUOTAS.iter().enumerate() {
            for _ in 0..q {
                v.push(r as f64 * 10.0);
                rows.push(r);
            }
        }
        rows[12] = 3;
        v[12] = 24.0;
        rows[30] = 6;
        v[30] = 56.0;
        let truth: Vec<usize> = {
            let mut t = rows.clone();
            t[12] = 2;
            t[30] = 5;
            t
        };
        let passes = correct_row_quotas(&v, &mut rows, 8, 1000.0);
        assert_eq!(row_counts(&rows), ROW_QUOTAS);
        assert_eq!(rows, truth);
        assert!(passes <= 2);
    }

    #[test]
    fn numbering_is_deterministic() {
        let (small, large) = layout(0.3);
        let p = NumberingParams::default();
        let a = number_board(&small, &large, (800, 800), &p).expect("numbered");
        let b = number_board(&small, &large, (800, 800), &p).expect("numbered");
        assert_eq!(a, b);
    }
}
