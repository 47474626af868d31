//! Bin partitions of a single variable.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An ordered partition of a variable into contiguous bins.
///
/// Bins are half-open `[lo, hi)`. The number of bins is `edges.len() - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAxis")]
pub struct Axis {
    name: String,
    edges: Vec<f64>,
}

/// Unchecked wire form of [`Axis`].
#[derive(Deserialize)]
struct RawAxis {
    name: String,
    edges: Vec<f64>,
}

impl TryFrom<RawAxis> for Axis {
    type Error = Error;

    fn try_from(raw: RawAxis) -> Result<Self> {
        Axis::from_edges(raw.name, raw.edges)
    }
}

impl Axis {
    /// Create an axis from explicit bin edges (strictly increasing, at least two).
    pub fn from_edges(name: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if edges.len() < 2 {
            return Err(Error::Validation(format!(
                "axis '{name}' needs at least 2 edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Validation(format!("axis '{name}' has non-finite edges")));
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Validation(format!(
                "axis '{name}' edges must be strictly increasing"
            )));
        }
        Ok(Self { name, edges })
    }

    /// Create an axis with `n_bins` equal-width bins spanning `[low, high)`.
    pub fn uniform(name: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Result<Self> {
        let name = name.into();
        if n_bins == 0 || !(low < high) {
            return Err(Error::Validation(format!(
                "axis '{name}': invalid uniform binning ({n_bins} bins, [{low}, {high}))"
            )));
        }
        let width = (high - low) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| low + width * i as f64).collect();
        edges.push(high);
        Self::from_edges(name, edges)
    }

    /// Discrete axis of `n` integer-centred bins `[-0.5, n - 0.5)`.
    ///
    /// Used for channel and component dimensions.
    pub fn discrete(name: impl Into<String>, n: usize) -> Result<Self> {
        Self::uniform(name, n, -0.5, n as f64 - 0.5)
    }

    /// Axis name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the axis.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Bin edges (length = `len() + 1`).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower edge of bin `bin`.
    pub fn lower_edge(&self, bin: usize) -> f64 {
        self.edges[bin]
    }

    /// Upper edge of bin `bin`.
    pub fn upper_edge(&self, bin: usize) -> f64 {
        self.edges[bin + 1]
    }

    /// Centre of bin `bin`.
    pub fn center(&self, bin: usize) -> f64 {
        0.5 * (self.edges[bin] + self.edges[bin + 1])
    }

    /// Find the bin containing `value`.
    ///
    /// Returns `None` for values outside `[first edge, last edge)` and for NaN.
    pub fn find_bin(&self, value: f64) -> Option<usize> {
        let edges = &self.edges;
        if !(value >= edges[0] && value < edges[edges.len() - 1]) {
            return None;
        }
        // First edge strictly greater than value; the bin is the one before it.
        let upper = edges.partition_point(|e| *e <= value);
        Some(upper - 1)
    }

    /// Whether `edges` of `coarse` are a subset of this axis' edges.
    pub(crate) fn is_refined_by(&self, coarse: &Axis) -> bool {
        coarse.edges.iter().all(|c| {
            self.edges.iter().any(|e| (e - c).abs() <= 1e-9 * (1.0 + c.abs()))
        })
    }
}
