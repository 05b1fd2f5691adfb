//! Intensity histogram of 8-bit samples.

/// 256-bin intensity histogram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    pub bins: [u32; 256],
    pub total: u64,
}

impl Histogram {
    pub fn from_samples<I: IntoIterator<Item = u8>>(samples: I) -> Self {
        let mut bins = [0u32; 256];
        let mut total = 0u64;
        for v in samples {
            bins[v as usize] += 1;
            total += 1;
        }
        Self { bins, total }
    }

    /// Lowest intensity at which the cumulative count reaches half the samples.
    pub fn median(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let half = self.total.div_ceil(2);
        let mut acc = 0u64;
        for (v, &h) in self.bins.iter().enumerate() {
            acc += h as u64;
            if acc >= half {
                return Some(v as u8);
            }
        }
        Some(255)
    }

    pub fn min_max(&self) -> Option<(u8, u8)> {
        let lo = self.bins.iter().position(|&h| h > 0)?;
        let hi = self.bins.iter().rposition(|&h| h > 0)?;
        Some((lo as u8, hi as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_histogram() {
        let h = Histogram::from_samples([5u8, 1, 9, 3, 7]);
        assert_eq!(h.median(), Some(5));
        assert_eq!(h.min_max(), Some((1, 9)));
    }

    #[test]
    fn empty_histogram_has_no_statistics() {
        let h = Histogram::from_samples(std::iter::empty());
        assert_eq!(h.median(), None);
        assert_eq!(h.min_max(), None);
        let flat = Histogram::from_samples([77u8; 50]);
        assert_eq!(flat.min_max(), Some((77, 77)));
    }
}
