//! Small/large dot separation and area-consistent candidate selection.

use crate::blobs::RefinedBlob;
use crate::board::{LARGE_DOT_COUNT, SMALL_DOT_COUNT};
use crate::config::SelectionParams;
use crate::error::DetectionError;
use dotboard_core::{kmeans_1d, mad, median};
use log::debug;

/// Blobs split by size class.
#[derive(Clone, Debug, Default)]
pub struct SizeClasses {
    pub small: Vec<RefinedBlob>,
    pub large: Vec<RefinedBlob>,
    /// The clustering looked implausible and large dots were re-picked by area.
    pub reassigned: bool,
}

fn rank_around<T: Clone>(items: &[(T, f64)], center: f64, target: usize) -> Vec<T> {
    let mut ranked: Vec<&(T, f64)> = items.iter().collect();
    ranked.sort_by(|a, b| {
        (a.1 - center)
            .abs()
            .total_cmp(&(b.1 - center).abs())
            .then(b.1.total_cmp(&a.1))
    });
    ranked.into_iter().take(target).map(|(t, _)| t.clone()).collect()
}

/// Pick `target` candidates with mutually consistent areas.
///
/// The acceptance window starts at `median ± mad_k * MAD` and widens by
/// `relax_factor / 2` of its width per iteration until it holds `target`
/// candidates, which are then ranked by distance to the in-window median
/// (larger area first on ties). If the window never fills, candidates are
/// ranked around the global median instead. With `target` or fewer
/// candidates, all are returned unchanged.
pub fn select_by_area<T, F>(
    candidates: &[T],
    target: usize,
    p: &SelectionParams,
    area: F,
) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> f64,
{
    if candidates.len() <= target {
        return candidates.to_vec();
    }
    let items: Vec<(T, f64)> = candidates.iter().map(|c| (c.clone(), area(c))).collect();
    let areas: Vec<f64> = items.iter().map(|(_, a)| *a).collect();
    let (Some(med), Some(spread)) = (median(&areas), mad(&areas)) else {
        return candidates.iter().take(target).cloned().collect();
    };

    // Floor the half-width: a zero MAD would give a window relaxation cannot grow.
    let min_half = (0.05 * med.abs()).max(1.0) * 0.5;
    let half = (p.mad_k * spread).max(min_half);
    let (mut lo, mut hi) = (med - half, med + half);

    for _ in 0..=p.area_iterations {
        let inside: Vec<(T, f64)> = items
            .iter()
            .filter(|(_, a)| *a >= lo && *a <= hi)
            .cloned()
            .collect();
        if inside.len() >= target {
            let in_areas: Vec<f64> = inside.iter().map(|(_, a)| *a).collect();
            let center = median(&in_areas).unwrap_or(med);
            return rank_around(&inside, center, target);
        }
        let grow = 0.5 * p.relax_factor * (hi - lo);
        lo -= grow;
        hi += grow;
    }
    rank_around(&items, med, target)
}

/// Split blobs into small grid dots and large orientation dots.
pub fn classify_sizes(
    blobs: &[RefinedBlob],
    p: &SelectionParams,
) -> Result<SizeClasses, DetectionError> {
    let sizes: Vec<f64> = blobs.iter().map(|b| b.size).collect();
    let mut small: Vec<usize> = Vec::new();
    let mut large: Vec<usize> = Vec::new();

    match kmeans_1d(&sizes, 2, 100) {
        Some(km) => {
            let counts = km.cluster_sizes();
            let large_label = match counts[0].cmp(&counts[1]) {
                std::cmp::Ordering::Less => 0,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => usize::from(km.centers[1][0] > km.centers[0][0]),
            };
            for (i, &l) in km.labels.iter().enumerate() {
                if l == large_label {
                    large.push(i);
                } else {
                    small.push(i);
                }
            }
        }
        None => small.extend(0..blobs.len()),
    }

    let implausible = small.len() < p.min_small_plausible || large.len() < p.min_large_plausible;
    let reassigned = blobs.len() >= p.min_total_for_reassign && implausible;
    if reassigned {
        debug!(
            "implausible size split ({} small, {} large); re-picking large dots by area",
            small.len(),
            large.len()
        );
        let mut by_area: Vec<usize> = (0..blobs.len()).collect();
        by_area.sort_by(|&a, &b| blobs[b].area().total_cmp(&blobs[a].area()));
        by_area.truncate(p.reassign_pool);
        large = select_by_area(&by_area, LARGE_DOT_COUNT, p, |&i| blobs[i].area());
        small = (0..blobs.len()).filter(|i| !large.contains(i)).collect();
    }

    let small = select_by_area(&small, SMALL_DOT_COUNT, p, |&i| blobs[i].area());
    let large = select_by_area(&large, LARGE_DOT_COUNT, p, |&i| blobs[i].area());
    if small.len() < SMALL_DOT_COUNT {
        return Err(DetectionError::BlobCount {
            expected: SMALL_DOT_COUNT,
            found: small.len(),
        });
    }

    Ok(SizeClasses {
        small: small.iter().map(|&i| blobs[i]).collect(),
        large: large.iter().map(|&i| blobs[i]).collect(),
        reassigned,
    })
}
