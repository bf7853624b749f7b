//! Trial alignment and peri-stimulus time histograms.

use chunkscope_core::util::{f64_to_usize_clamped, usize_to_f64};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Window around an alignment time, in seconds relative to it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct TrialWindow {
    /// Window start (usually negative).
    pub start: f64,
    /// Window end (exclusive).
    pub end: f64,
}

impl TrialWindow {
    /// Window `[start, end)`; the bounds are swapped if given in reverse.
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// Window length in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl Default for TrialWindow {
    fn default() -> Self {
        Self::new(-0.5, 1.0)
    }
}

/// For each alignment time `a`, the times in `[a + start, a + end)` minus `a`.
///
/// `times` must be ascending.
#[must_use]
pub fn align_to_trials(times: &[f64], align_times: &[f64], window: TrialWindow) -> Vec<Vec<f64>> {
    align_times
        .iter()
        .map(|&a| {
            if !a.is_finite() {
                return Vec::new();
            }
            let lo = times.partition_point(|&t| t < a + window.start);
            let hi = times.partition_point(|&t| t < a + window.end);
            times[lo..hi.max(lo)].iter().map(|&t| t - a).collect()
        })
        .collect()
}

/// Firing-rate histogram over aligned trials.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Psth {
    /// Left edge of every bin, relative to the alignment time.
    pub bin_starts: Vec<f64>,
    /// Bin width in seconds.
    pub bin_size: f64,
    /// Mean firing rate per bin in Hz.
    pub rates: Vec<f64>,
    /// Number of trials averaged.
    pub num_trials: usize,
}

/// Histogram aligned spike times into `bin_size` bins over `window` and
/// convert counts to rates (spikes per second per trial).
#[must_use]
pub fn psth_histogram(trials: &[Vec<f64>], window: TrialWindow, bin_size: f64) -> Psth {
    let bin_size = if bin_size.is_finite() && bin_size > 0.0 {
        bin_size
    } else {
        window.duration().max(f64::EPSILON)
    };
    // absorb rounding so a 0.3 s window of 0.05 s bins has 6 bins, not 7
    let num_bins =
        f64_to_usize_clamped((window.duration() / bin_size - 1e-9).ceil(), 1_000_000).max(1);
    let mut counts = vec![0usize; num_bins];
    for trial in trials {
        for &t in trial {
            if t < window.start || t >= window.end {
                continue;
            }
            let bin = f64_to_usize_clamped(((t - window.start) / bin_size).floor(), num_bins - 1);
            counts[bin] += 1;
        }
    }
    let denom = usize_to_f64(trials.len().max(1)) * bin_size;
    Psth {
        bin_starts: (0..num_bins)
            .map(|i| window.start + usize_to_f64(i) * bin_size)
            .collect(),
        bin_size,
        rates: counts.into_iter().map(|c| usize_to_f64(c) / denom).collect(),
        num_trials: trials.len(),
    }
}
