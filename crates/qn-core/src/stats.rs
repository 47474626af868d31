//! Online mean/error accumulator and its algebra.

use std::ops::{Add, Div, Mul};

use serde::{Deserialize, Serialize};

/// Denominators with smaller magnitude make a ratio degenerate.
pub const DIVISION_THRESHOLD: f64 = 1e-7;

/// Standard error of the mean from raw moments.
pub fn sigma(mean: f64, sum2: f64, n: u64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    ((sum2 / n - mean * mean).abs() / n).sqrt()
}

/// Running mean, sum, sum of squares, entry count and standard error.
///
/// [`Statistic::fill`] and [`Statistic::merge`] keep raw moments. The
/// operators (`+`, `*`, `/`) implement error propagation between
/// independent estimates; their `sum2` holds the propagated variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    mean: f64,
    sum: f64,
    sum2: f64,
    entries: u64,
    error: f64,
}

impl Statistic {
    /// Construct from explicit moments.
    pub fn from_parts(mean: f64, sum: f64, sum2: f64, entries: u64, error: f64) -> Self {
        Self { mean, sum, sum2, entries, error }
    }

    /// Mean of filled values.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sum of filled values.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Sum of squares (or propagated variance after algebra).
    pub fn sum2(&self) -> f64 {
        self.sum2
    }

    /// Number of entries.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Standard error of the mean.
    pub fn error(&self) -> f64 {
        self.error
    }

    /// Population variance of filled values.
    pub fn variance(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        (self.sum2 / self.entries as f64 - self.mean * self.mean).abs()
    }

    /// Square root of [`Statistic::variance`].
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Add one value.
    pub fn fill(&mut self, value: f64) {
        self.fill_n(value, 1);
    }

    /// Add `value` with integer multiplicity `k` (resampling weight).
    pub fn fill_n(&mut self, value: f64, k: u32) {
        if k == 0 {
            return;
        }
        let k_f = f64::from(k);
        self.sum += value * k_f;
        self.sum2 += value * value * k_f;
        self.entries += u64::from(k);
        self.refresh();
    }

    /// Merge raw moments of a disjoint sample.
    ///
    /// Associative and commutative; sharded accumulations merged this way
    /// equal the sequential fill up to rounding.
    pub fn merge(&mut self, other: &Statistic) {
        self.sum += other.sum;
        self.sum2 += other.sum2;
        self.entries += other.entries;
        self.refresh();
    }

    /// Element-wise `sqrt(|x|)` of mean, sum, sum2 and error.
    pub fn sqrt(self) -> Self {
        Self {
            mean: self.mean.abs().sqrt(),
            sum: self.sum.abs().sqrt(),
            sum2: self.sum2.abs().sqrt(),
            entries: self.entries,
            error: self.error.abs().sqrt(),
        }
    }

    fn refresh(&mut self) {
        if self.entries == 0 {
            *self = Self::default();
            return;
        }
        self.mean = self.sum / self.entries as f64;
        self.error = sigma(self.mean, self.sum2, self.entries);
    }
}

impl Add for Statistic {
    type Output = Statistic;

    /// Entry-weighted combination of two independent estimates.
    fn add(self, b: Statistic) -> Statistic {
        let entries = self.entries + b.entries;
        if entries == 0 {
            return Statistic::default();
        }
        let (na, nb, n) = (self.entries as f64, b.entries as f64, entries as f64);
        let mean = (na * self.mean + nb * b.mean) / n;
        let sum2 = (self.sum2 * na + b.sum2 * nb) / n;
        Statistic { mean, sum: mean * n, sum2, entries, error: sum2.abs().sqrt() }
    }
}

impl Mul for Statistic {
    type Output = Statistic;

    fn mul(self, b: Statistic) -> Statistic {
        let mean = self.mean * b.mean;
        let sum2 = self.mean * self.mean * b.error * b.error + b.mean * b.mean * self.error * self.error;
        let entries = self.entries + b.entries;
        Statistic { mean, sum: mean * entries as f64, sum2, entries, error: sum2.sqrt() }
    }
}

impl Div for Statistic {
    type Output = Statistic;

    /// Ratio with propagated error; the zero statistic when `|b.mean| < 1e-7`.
    fn div(self, b: Statistic) -> Statistic {
        let entries = self.entries + b.entries;
        if b.mean.abs() < DIVISION_THRESHOLD {
            return Statistic { entries, ..Statistic::default() };
        }
        let mean = self.mean / b.mean;
        let b2 = b.mean * b.mean;
        let sum2 = self.error * self.error / b2 + self.mean * self.mean / (b2 * b2) * b.error * b.error;
        Statistic { mean, sum: mean * entries as f64, sum2, entries, error: sum2.sqrt() }
    }
}

impl Mul<f64> for Statistic {
    type Output = Statistic;

    fn mul(self, b: f64) -> Statistic {
        Statistic {
            mean: self.mean * b,
            sum: self.sum * b,
            sum2: self.sum2 * b * b,
            entries: self.entries,
            error: self.error * b.abs(),
        }
    }
}
