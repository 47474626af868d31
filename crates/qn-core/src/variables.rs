//! Named per-event variables laid out in one flat value array.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A contiguous slice `[id, id + length)` of the per-event value array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    id: usize,
    length: usize,
}

impl Variable {
    /// First index in the value array.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of consecutive values (1 for scalars, N for channel arrays).
    pub fn length(&self) -> usize {
        self.length
    }

    /// Scalar value, or element 0 of an array variable.
    pub fn value(&self, values: &[f64]) -> f64 {
        values.get(self.id).copied().unwrap_or(f64::NAN)
    }

    /// Element `i`. Scalars broadcast to every element.
    ///
    /// An index past the end of an array variable is an `OutOfRange` error.
    pub fn element(&self, values: &[f64], i: usize) -> Result<f64> {
        let offset = match self.length {
            0 | 1 => 0,
            n if i < n => i,
            n => {
                return Err(Error::OutOfRange(format!(
                    "element {i} of a {n}-element variable at {}",
                    self.id
                )));
            }
        };
        Ok(values.get(self.id + offset).copied().unwrap_or(f64::NAN))
    }

    /// The whole slice.
    pub fn slice<'a>(&self, values: &'a [f64]) -> &'a [f64] {
        let end = (self.id + self.length).min(values.len());
        &values[self.id.min(end)..end]
    }
}

/// Caller-constructed registry of variables with stable contiguous ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSchema {
    order: Vec<String>,
    variables: HashMap<String, Variable>,
    size: usize,
}

impl VariableSchema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable of `length` consecutive values.
    pub fn add(&mut self, name: impl Into<String>, length: usize) -> Result<Variable> {
        let name = name.into();
        if length == 0 {
            return Err(Error::Validation(format!("variable '{name}' has zero length")));
        }
        if self.variables.contains_key(&name) {
            return Err(Error::Validation(format!("variable '{name}' already registered")));
        }
        let var = Variable { id: self.size, length };
        self.size += length;
        self.order.push(name.clone());
        self.variables.insert(name, var);
        Ok(var)
    }

    /// Look up a variable by name.
    pub fn get(&self, name: &str) -> Result<Variable> {
        self.variables
            .get(name)
            .copied()
            .ok_or_else(|| Error::Validation(format!("unknown variable '{name}'")))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Length of the flat value array.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Variable names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Zero-filled value array of the right size.
    pub fn new_values(&self) -> Vec<f64> {
        vec![0.0; self.size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_contiguous() {
        let mut s = VariableSchema::new();
        let cent = s.add("Centrality", 1).unwrap();
        let mult = s.add("MultA", 4).unwrap();
        let phi = s.add("ChannelPhi", 4).unwrap();
        assert_eq!((cent.id(), mult.id(), phi.id()), (0, 1, 5));
        assert_eq!(s.size(), 9);
        assert_eq!(s.get("MultA").unwrap(), mult);
        assert!(matches!(s.get("Nope"), Err(Error::Validation(_))));
        assert!(s.add("MultA", 1).is_err());
        assert_eq!(s.names().collect::<Vec<_>>(), vec!["Centrality", "MultA", "ChannelPhi"]);
    }

    #[test]
    fn reads_from_snapshot() {
        let mut s = VariableSchema::new();
        let a = s.add("a", 1).unwrap();
        let b = s.add("b", 3).unwrap();
        let values = vec![7.0, 1.0, 2.0, 3.0];
        assert_eq!(a.value(&values), 7.0);
        assert_eq!(b.element(&values, 2).unwrap(), 3.0);
        assert_eq!(a.element(&values, 2).unwrap(), 7.0);
        assert!(matches!(b.element(&values, 3), Err(Error::OutOfRange(_))));
        assert_eq!(b.slice(&values), &[1.0, 2.0, 3.0]);
    }
}
