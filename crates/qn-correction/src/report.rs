//! Calibration coverage summary returned by `finalize`.

use serde::{Deserialize, Serialize};

use crate::steps::StepCoverage;

/// Coverage of one step of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntry {
    /// Configuration name.
    pub configuration: String,
    /// Step key.
    pub step: String,
    /// Event-class bins.
    pub bins: usize,
    /// Bins that reached Ready.
    pub ready_bins: usize,
    /// `ready_bins / bins`.
    pub coverage: f64,
}

/// Per-step calibration coverage of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Events offered.
    pub events: u64,
    /// Events that passed the event cuts and binning.
    pub accepted_events: u64,
    /// One entry per configuration and step, in chain order.
    pub entries: Vec<CoverageEntry>,
}

impl CalibrationReport {
    /// Empty report for a run of `events` events.
    pub fn new(events: u64, accepted_events: u64) -> Self {
        Self { events, accepted_events, entries: Vec::new() }
    }

    /// Append the coverage of one step.
    pub fn push(&mut self, configuration: &str, step: &str, coverage: StepCoverage) {
        self.entries.push(CoverageEntry {
            configuration: configuration.to_string(),
            step: step.to_string(),
            bins: coverage.bins,
            ready_bins: coverage.ready_bins,
            coverage: coverage.fraction(),
        });
    }

    /// Entry for `configuration` / `step`.
    pub fn get(&self, configuration: &str, step: &str) -> Option<&CoverageEntry> {
        self.entries.iter().find(|e| e.configuration == configuration && e.step == step)
    }

    /// Steps that never reached Ready in any bin.
    pub fn uncalibrated(&self) -> impl Iterator<Item = &CoverageEntry> {
        self.entries.iter().filter(|e| e.ready_bins == 0)
    }

    /// Whether every step is Ready in every bin.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.ready_bins == e.bins)
    }

    /// Emit the summary through `log`.
    pub fn log(&self) {
        log::info!(
            "calibration: {} of {} events accepted, {} steps, {} fully calibrated",
            self.accepted_events,
            self.events,
            self.entries.len(),
            self.entries.iter().filter(|e| e.ready_bins == e.bins).count()
        );
        for e in self.uncalibrated() {
            log::warn!("{}/{}: no event-class bin reached calibration", e.configuration, e.step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_coverage() {
        let mut report = CalibrationReport::new(10, 8);
        report.push("AA", "recentering", StepCoverage { bins: 4, ready_bins: 4 });
        report.push("AA", "alignment", StepCoverage { bins: 4, ready_bins: 1 });
        report.push("BB", "recentering", StepCoverage { bins: 4, ready_bins: 0 });
        assert_eq!(report.get("AA", "alignment").unwrap().coverage, 0.25);
        assert_eq!(report.uncalibrated().count(), 1);
        assert!(!report.is_complete());
        report.log();
    }
}
