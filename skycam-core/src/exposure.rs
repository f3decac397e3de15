//! Automatic exposure control.
//!
//! The estimator drives the 90th-percentile pixel value toward a target
//! brightness by scaling the exposure time proportionally. A dead band
//! around the target stops it from hunting on small scene changes, and
//! results are floored to whole milliseconds so successive estimates
//! settle instead of oscillating in the sub-millisecond noise.

// ── Defaults ─────────────────────────────────────────────────────

/// Target value for the 90th-percentile pixel.
pub const TARGET_BRIGHTNESS: f64 = 40_000.0;

/// Half-width of the dead band around the target.
pub const BRIGHTNESS_TOLERANCE: f64 = 5_000.0;

/// Longest exposure the estimator will suggest, in seconds.
pub const MAX_AUTO_EXPOSURE: f64 = 10.0;

/// Percentile used as the brightness statistic.
const PERCENTILE: usize = 90;

/// Pixel value counted as saturated.
const SATURATED_VALUE: u16 = u16::MAX;

/// Fraction of saturated pixels above which an image counts as blown out.
const SATURATION_FRACTION: f64 = 0.10;

/// Pixel value counted as dark.
const DARK_VALUE: u16 = 2_000;

/// Fraction of dark pixels above which an image counts as underexposed.
const DARK_FRACTION: f64 = 0.30;

// ── ExposureEstimator ────────────────────────────────────────────

/// Proportional exposure controller over a percentile statistic.
///
/// Holds a scratch buffer so repeated estimates on full sensor frames
/// do not reallocate.
#[derive(Debug, Clone)]
pub struct ExposureEstimator {
    target: f64,
    tolerance: f64,
    max_exposure: f64,
    scratch: Vec<u16>,
}

impl Default for ExposureEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureEstimator {
    pub fn new() -> Self {
        Self {
            target: TARGET_BRIGHTNESS,
            tolerance: BRIGHTNESS_TOLERANCE,
            max_exposure: MAX_AUTO_EXPOSURE,
            scratch: Vec::new(),
        }
    }

    /// Override the brightness target.
    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }

    /// Override the dead-band half-width.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Override the exposure ceiling.
    pub fn with_max_exposure(mut self, max_exposure: f64) -> Self {
        self.max_exposure = max_exposure;
        self
    }

    /// Suggest the next exposure from one image's samples.
    ///
    /// Returns `current` unchanged when the samples are empty or the
    /// percentile already sits inside the dead band. The result is
    /// capped at the ceiling and floored to a whole millisecond; a
    /// lower bound is the caller's concern, since it depends on the
    /// device.
    pub fn next_exposure(&mut self, samples: &[u16], current: f64) -> f64 {
        if samples.is_empty() {
            return current;
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(samples);
        self.scratch.sort_unstable();

        let n = self.scratch.len();
        let mut idx = PERCENTILE * (n - 1) / 100;
        let ascending = self.scratch[0] < self.scratch[n - 1];
        let value = if ascending {
            self.scratch[idx]
        } else {
            // Flat data sorts to a constant run; index from the top so
            // the statistic stays on the bright side.
            if idx == 0 {
                idx = 1;
            }
            self.scratch[n - idx]
        };
        let value = f64::from(value);

        if value > self.target - self.tolerance && value < self.target + self.tolerance {
            return current;
        }

        let mut next = self.target * current / value;
        if next > self.max_exposure {
            next = self.max_exposure;
        }
        (next * 1000.0).floor() / 1000.0
    }
}

// ── Image predicates ─────────────────────────────────────────────

/// Whether more than 10% of the samples are at full scale.
pub fn is_saturated(samples: &[u16]) -> bool {
    if samples.is_empty() {
        return false;
    }
    let hits = samples.iter().filter(|&&v| v == SATURATED_VALUE).count();
    hits as f64 > samples.len() as f64 * SATURATION_FRACTION
}

/// Whether more than 30% of the samples are below the dark floor.
pub fn is_dark(samples: &[u16]) -> bool {
    if samples.is_empty() {
        return false;
    }
    let hits = samples.iter().filter(|&&v| v < DARK_VALUE).count();
    hits as f64 > samples.len() as f64 * DARK_FRACTION
}

// ── Tests ────────────────────────────────────────────────────────
