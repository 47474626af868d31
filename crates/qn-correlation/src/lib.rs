//! # qn-correlation
//!
//! Binned correlations of corrected flow vectors.
//!
//! A [`Correlation`] is a scalar function of several detector flow vectors.
//! Each event, the [`CorrelationEngine`] evaluates it for every combination of
//! the inputs' bins and accumulates the value in the current event class,
//! together with bootstrap or subsampling realizations for the statistical
//! error. Inputs are captured from a [`qn_correction::CorrectionCalculator`]
//! into [`QnInputs`] at the correction stage the analysis needs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlation;
pub mod engine;

pub use correlation::{Combiner, Correlation, CorrelationResult, WeightTag};
pub use engine::{CorrelationEngine, QnInputs};
