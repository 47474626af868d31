//! # qn-core
//!
//! Core building blocks for flow-vector corrections:
//!
//! - [`Axis`] and the N-dimensional [`BinnedContainer`]
//! - [`QVector`] harmonic flow vectors with normalization state
//! - [`Statistic`] online accumulator and its error-propagation algebra
//! - [`Resampler`] for bootstrap / subsampling error estimates
//! - [`VariableSchema`], [`CutsSet`] and the [`EventSource`] trait

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod container;
pub mod cuts;
pub mod error;
pub mod qvector;
pub mod sampler;
pub mod stats;
pub mod traits;
pub mod variables;

pub use axis::Axis;
pub use container::BinnedContainer;
pub use cuts::{Cut, CutConfig, CutKind, CutsSet};
pub use error::{Error, Result};
pub use qvector::{MAX_HARMONICS, Normalization, QVec, QVector};
pub use sampler::{ResampledStatistic, Resampler, ResamplingConfig, ResamplingMethod};
pub use stats::Statistic;
pub use traits::{EventSource, FnSource, MemorySource};
pub use variables::{Variable, VariableSchema};
