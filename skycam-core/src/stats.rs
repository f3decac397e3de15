//! Running statistics over a sample series.

/// Online mean and standard deviation (Welford's recurrence).
///
/// Single-pass and O(1) per sample, so calibration sweeps can fold in
/// per-frame brightness without keeping the frames around.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatSeries {
    count: u64,
    mean: f64,
    m2: f64,
}

impl StatSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the series.
    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    /// Mean of the samples so far; zero when empty.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation; zero when empty.
    pub fn stdev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }

    /// Number of samples folded in.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_reads_zero() {
        let s = StatSeries::new();
        assert!(s.is_empty());
        assert_eq!(s.mean(), 0.0);
        assert_eq!(s.stdev(), 0.0);
    }

    #[test]
    fn single_sample() {
        let mut s = StatSeries::new();
        s.push(42.0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.mean(), 42.0);
        assert_eq!(s.stdev(), 0.0);
    }

    #[test]
    fn known_series() {
        // Textbook series: mean 5, population stdev 2.
        let mut s = StatSeries::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.push(v);
        }
        assert_eq!(s.len(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.stdev() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn constant_series_has_zero_spread() {
        let mut s = StatSeries::new();
        for _ in 0..100 {
            s.push(7.5);
        }
        assert_eq!(s.mean(), 7.5);
        assert!(s.stdev().abs() < 1e-12);
    }
}
