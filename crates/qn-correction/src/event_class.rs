//! Event-class binning shared by all calibration profiles.

use qn_core::{Axis, BinnedContainer, Result, Variable};

/// Ordered `(variable, axis)` pairs defining the event classes.
#[derive(Debug, Clone, Default)]
pub struct EventClassSet {
    variables: Vec<Variable>,
    layout: BinnedContainer<()>,
}

impl EventClassSet {
    /// Integrated set (a single event class).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binning variable. Axis names must be unique.
    pub fn add(&mut self, variable: Variable, axis: Axis) -> Result<()> {
        self.layout.add_axis(axis)?;
        self.variables.push(variable);
        Ok(())
    }

    /// Axes in binning order.
    pub fn axes(&self) -> &[Axis] {
        self.layout.axes()
    }

    /// Number of event classes.
    pub fn n_bins(&self) -> usize {
        self.layout.len()
    }

    /// Linear event-class bin for the current snapshot, `None` if any
    /// variable falls outside its axis.
    pub fn bin(&self, values: &[f64]) -> Option<usize> {
        self.variables.iter().zip(self.layout.axes()).try_fold(0, |linear, (v, axis)| {
            axis.find_bin(v.value(values)).map(|b| linear * axis.len() + b)
        })
    }
}
