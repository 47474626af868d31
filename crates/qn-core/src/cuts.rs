//! Selection cuts on per-event variables.
//!
//! A rejected cut is a filtering decision, not an error.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::variables::{Variable, VariableSchema};

/// Cut condition on one value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CutKind {
    /// `v < threshold`.
    Below {
        /// Upper bound (exclusive).
        threshold: f64,
    },
    /// `v > threshold`.
    Above {
        /// Lower bound (exclusive).
        threshold: f64,
    },
    /// `min < v < max`.
    Within {
        /// Lower bound (exclusive).
        min: f64,
        /// Upper bound (exclusive).
        max: f64,
    },
    /// Not `min < v < max`.
    Outside {
        /// Lower bound of the excluded window.
        min: f64,
        /// Upper bound of the excluded window.
        max: f64,
    },
    /// Bit `bit` of the integer value equals `expected`.
    SetBit {
        /// Bit position.
        bit: u32,
        /// Required state.
        #[serde(default = "default_true")]
        expected: bool,
    },
}

fn default_true() -> bool {
    true
}

impl CutKind {
    /// Whether `value` passes. NaN never passes.
    pub fn passes(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match *self {
            CutKind::Below { threshold } => value < threshold,
            CutKind::Above { threshold } => value > threshold,
            CutKind::Within { min, max } => min < value && value < max,
            CutKind::Outside { min, max } => !(min < value && value < max),
            CutKind::SetBit { bit, expected } => {
                let bits = value as i64;
                bit < 64 && ((bits >> bit) & 1 == 1) == expected
            }
        }
    }
}

/// Serializable cut: variable name plus condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutConfig {
    /// Variable name in the schema.
    pub variable: String,
    /// Condition.
    #[serde(flatten)]
    pub kind: CutKind,
}

impl CutConfig {
    /// Resolve the variable against `schema`.
    pub fn build(&self, schema: &VariableSchema) -> Result<Cut> {
        Ok(Cut::new(schema.get(&self.variable)?, self.kind))
    }
}

/// A cut bound to a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cut {
    variable: Variable,
    kind: CutKind,
}

impl Cut {
    /// Bind `kind` to `variable`.
    pub fn new(variable: Variable, kind: CutKind) -> Self {
        Self { variable, kind }
    }

    /// Evaluate on element `element` of the variable (scalars ignore it).
    ///
    /// An element past the end of an array variable is not selected.
    pub fn is_selected(&self, values: &[f64], element: usize) -> bool {
        self.variable.element(values, element).is_ok_and(|v| self.kind.passes(v))
    }
}

/// Conjunction of cuts. An empty set selects everything.
#[derive(Debug, Clone, Default)]
pub struct CutsSet {
    cuts: Vec<Cut>,
}

impl CutsSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configurations.
    pub fn from_configs(configs: &[CutConfig], schema: &VariableSchema) -> Result<Self> {
        let cuts = configs.iter().map(|c| c.build(schema)).collect::<Result<Vec<_>>>()?;
        Ok(Self { cuts })
    }

    /// Append a cut.
    pub fn add(&mut self, cut: Cut) {
        self.cuts.push(cut);
    }

    /// Number of cuts.
    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    /// No cuts configured.
    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// All cuts pass for `element`.
    pub fn is_selected(&self, values: &[f64], element: usize) -> bool {
        self.cuts.iter().all(|c| c.is_selected(values, element))
    }
}
