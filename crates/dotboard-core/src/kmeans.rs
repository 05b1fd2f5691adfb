//! Deterministic Lloyd k-means for the small clustering problems of the
//! detector: board rows (1-D), dot sizes (1-D) and line orientations (2-D).

/// Result of a k-means run.
#[derive(Clone, Debug, PartialEq)]
pub struct KMeans<const D: usize> {
    /// Cluster label per input sample, in `0..k`.
    pub labels: Vec<usize>,
    pub centers: Vec<[f64; D]>,
    pub iterations: usize,
}

impl<const D: usize> KMeans<D> {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centers.len()];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }
}

#[inline]
fn dist2<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest<const D: usize>(p: &[f64; D], centers: &[[f64; D]]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = dist2(p, c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Lloyd iterations from explicit seeds. Empty clusters are re-seeded with
/// the sample farthest from its current center.
pub fn kmeans_from_seeds<const D: usize>(
    samples: &[[f64; D]],
    seeds: Vec<[f64; D]>,
    max_iterations: usize,
) -> Option<KMeans<D>> {
    let k = seeds.len();
    if k == 0 || samples.len() < k {
        return None;
    }
    let mut centers = seeds;
    let mut labels = vec![usize::MAX; samples.len()];
    let mut iterations = 0;

    for it in 0..max_iterations.max(1) {
        iterations = it + 1;
        let mut changed = false;
        for (label, p) in labels.iter_mut().zip(samples) {
            let n = nearest(p, &centers);
            if *label != n {
                *label = n;
                changed = true;
            }
        }

        let mut sums = vec![[0.0; D]; k];
        let mut counts = vec![0usize; k];
        for (p, &l) in samples.iter().zip(&labels) {
            counts[l] += 1;
            for d in 0..D {
                sums[l][d] += p[d];
            }
        }

        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..D {
                    centers[c][d] = sums[c][d] / counts[c] as f64;
                }
                continue;
            }
            // Steal the worst-fitting sample from a cluster that can spare it.
            let mut worst: Option<(usize, f64)> = None;
            for (i, (p, &l)) in samples.iter().zip(&labels).enumerate() {
                if counts[l] < 2 {
                    continue;
                }
                let d = dist2(p, &centers[l]);
                if worst.is_none_or(|(_, wd)| d > wd) {
                    worst = Some((i, d));
                }
            }
            let (i, _) = worst?;
            counts[labels[i]] -= 1;
            labels[i] = c;
            counts[c] = 1;
            centers[c] = samples[i];
            changed = true;
        }

        if !changed {
            break;
        }
    }

    Some(KMeans {
        labels,
        centers,
        iterations,
    })
}

/// 1-D k-means seeded at evenly spaced quantiles of the sorted samples.
pub fn kmeans_1d(values: &[f64], k: usize, max_iterations: usize) -> Option<KMeans<1>> {
    if k == 0 || values.len() < k || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let seeds = (0..k)
        .map(|i| {
            let idx = (((2 * i + 1) * n) / (2 * k)).min(n - 1);
            [sorted[idx]]
        })
        .collect();
    let samples: Vec<[f64; 1]> = values.iter().map(|&v| [v]).collect();
    kmeans_from_seeds(&samples, seeds, max_iterations)
}

/// k-means with farthest-point seeding starting from `samples[first]`.
pub fn kmeans_farthest<const D: usize>(
    samples: &[[f64; D]],
    k: usize,
    first: usize,
    max_iterations: usize,
) -> Option<KMeans<D>> {
    if k == 0 || samples.len() < k || first >= samples.len() {
        return None;
    }
    let mut seeds = vec![samples[first]];
    while seeds.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in samples.iter().enumerate() {
            let d = seeds
                .iter()
                .map(|s| dist2(p, s))
                .fold(f64::INFINITY, f64::min);
            if best.is_none_or(|(_, bd)| d > bd) {
                best = Some((i, d));
            }
        }
        let (i, _) = best?;
        seeds.push(samples[i]);
    }
    kmeans_from_seeds(samples, seeds, max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_rows() {
        let mut values = Vec::new();
        for row in 0..7 {
            for col in 0..6 {
                values.push(row as f64 * 50.0 + col as f64 * 0.7);
            }
        }
        let km = kmeans_1d(&values, 7, 100).expect("clusters");
        assert_eq!(km.cluster_sizes(), vec![6; 7]);
        for row in 0..7 {
            let first = km.labels[row * 6];
            assert!(km.labels[row * 6..row * 6 + 6].iter().all(|&l| l == first));
        }
    }

    #[test]
    fn two_size_groups() {
        let sizes = [10.0, 10.5, 9.8, 10.2, 25.0, 24.0, 10.1, 26.0];
        let km = kmeans_1d(&sizes, 2, 50).expect("clusters");
        let big = km.labels[4];
        assert_eq!(km.labels[5], big);
        assert_eq!(km.labels[7], big);
        assert_ne!(km.labels[0], big);
        assert_eq!(km.cluster_sizes().iter().sum::<usize>(), sizes.len());
    }

    #[test]
    fn too_few_samples_fail() {
        assert!(kmeans_1d(&[1.0, 2.0], 3, 10).is_none());
        assert!(kmeans_1d(&[1.0, f64::NAN, 2.0], 2, 10).is_none());
    }

    #[test]
    fn farthest_seeding_splits_two_blobs() {
        let pts = [[0.0, 0.0], [0.1, 0.0], [5.0, 5.0], [5.1, 4.9], [0.0, 0.2]];
        let km = kmeans_farthest(&pts, 2, 0, 20).expect("clusters");
        assert_eq!(km.labels[0], km.labels[1]);
        assert_eq!(km.labels[0], km.labels[4]);
        assert_eq!(km.labels[2], km.labels[3]);
        assert_ne!(km.labels[0], km.labels[2]);
    }
}
