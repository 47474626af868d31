//! Core traits
//!
//! The correction and correlation layers never read storage directly: they
//! pull one flat snapshot of variable values per event through
//! [`EventSource`].

use crate::Result;

/// Provider of per-event variable snapshots.
pub trait EventSource {
    /// Write the next event's values into `values` (laid out per the schema).
    ///
    /// Returns `Ok(false)` at end of stream.
    fn next_event(&mut self, values: &mut [f64]) -> Result<bool>;
}

/// Event source backed by in-memory snapshots.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: Vec<Vec<f64>>,
    cursor: usize,
}

impl MemorySource {
    /// Source over `events`, each a full value array.
    pub fn new(events: Vec<Vec<f64>>) -> Self {
        Self { events, cursor: 0 }
    }

    /// Append one event.
    pub fn push(&mut self, values: Vec<f64>) {
        self.events.push(values);
    }

    /// Number of events not yet read.
    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }
}

impl EventSource for MemorySource {
    fn next_event(&mut self, values: &mut [f64]) -> Result<bool> {
        let Some(event) = self.events.get(self.cursor) else {
            return Ok(false);
        };
        let n = event.len().min(values.len());
        values[..n].copy_from_slice(&event[..n]);
        values[n..].iter_mut().for_each(|v| *v = 0.0);
        self.cursor += 1;
        Ok(true)
    }
}

/// Closure-backed source: `f(values)` fills the snapshot and returns whether an event was produced.
pub struct FnSource<F>(pub F);

impl<F> EventSource for FnSource<F>
where
    F: FnMut(&mut [f64]) -> Result<bool>,
{
    fn next_event(&mut self, values: &mut [f64]) -> Result<bool> {
        (self.0)(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_streams_in_order() {
        let mut src = MemorySource::new(vec![vec![1.0, 2.0], vec![3.0]]);
        let mut values = [0.0; 2];
        assert!(src.next_event(&mut values).unwrap());
        assert_eq!(values, [1.0, 2.0]);
        assert!(src.next_event(&mut values).unwrap());
        assert_eq!(values, [3.0, 0.0]);
        assert!(!src.next_event(&mut values).unwrap());
        assert_eq!(src.remaining(), 0);
    }

    #[test]
    fn fn_source_counts_down() {
        let mut left = 3;
        let mut src = FnSource(|v: &mut [f64]| {
            if left == 0 {
                return Ok(false);
            }
            v[0] = left as f64;
            left -= 1;
            Ok(true)
        });
        let mut values = [0.0];
        let mut n = 0;
        while src.next_event(&mut values).unwrap() {
            n += 1;
        }
        assert_eq!(n, 3);
    }
}
