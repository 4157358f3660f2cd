// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-variant sample sequences and their summary.
//!
//! Samples are kept in arrival order and summarised once, after the
//! measure loop. The standard deviation is the population form
//! `sqrt(Σx²/n − mean²)` with the radicand clamped at zero; a sequence
//! whose samples are all equal short-circuits to that value and exactly 0.

use crate::timing::TimingSample;

/// Mean, population standard deviation and range of a sample sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Number of samples.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

/// Summarise `samples`; `None` for an empty slice.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(samples: &[f64]) -> Option<Summary> {
    let (&first, _) = samples.split_first()?;
    let (min, max) = samples
        .iter()
        .fold((first, first), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let count = samples.len();

    if samples.iter().all(|&x| x.to_bits() == first.to_bits()) {
        return Some(Summary {
            count,
            mean: first,
            stddev: 0.0,
            min,
            max,
        });
    }

    let n = count as f64;
    let (sum, sq_sum) = samples
        .iter()
        .fold((0.0, 0.0), |(s, q), &x| (s + x, q + x * x));
    let mean = sum / n;
    let stddev = (sq_sum / n - mean * mean).max(0.0).sqrt();
    Some(Summary {
        count,
        mean,
        stddev,
        min,
        max,
    })
}

/// Append-only timing sequence of one variant.
#[derive(Debug, Clone, Default)]
pub struct RunStatistics {
    samples: Vec<f64>,
}

impl RunStatistics {
    /// Empty sequence with room for `n` samples.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
        }
    }

    /// Append one sample.
    pub fn record(&mut self, sample: TimingSample) {
        self.samples.push(sample.ms());
    }

    /// Number of samples recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in recording order.
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Summary of everything recorded.
    #[must_use]
    pub fn summarize(&self) -> Option<Summary> {
        summarize(&self.samples)
    }
}
