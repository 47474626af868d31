//! Correction steps.
//!
//! Every step follows the same streaming protocol per event-class bin: while
//! its [`CalibrationState`] is Accumulating it passes data through unchanged
//! and reports [`StepStatus::NotCalibrated`]; once the bin turns Ready it
//! corrects every later event. Corrections for an event are computed before
//! that event is collected, so nothing is corrected retroactively.

pub mod alignment;
pub mod equalization;
pub mod recentering;
pub mod twist_rescale;

use qn_core::{Axis, Normalization, QVector, Result};

use crate::data_vector::DataVector;
use crate::profile::{CalibrationProfile, CalibrationState, CalibrationStore};

pub use alignment::Alignment;
pub use equalization::{EqualizationMethod, GainEqualization};
pub use recentering::Recentering;
pub use twist_rescale::{TwistAndRescale, TwistRescaleMethod};

/// Smallest width or denominator treated as non-degenerate.
pub const MIN_DENOMINATOR: f64 = 1e-7;

/// Where a step acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStage {
    /// On the data-vector bank, before the Qn vector is built.
    InputData,
    /// On the built Qn vector.
    QnVector,
}

/// Outcome of running a step on one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The correction was applied.
    Applied,
    /// The current event-class bin is still accumulating; later steps must not run.
    NotCalibrated,
    /// The step cannot run (missing inputs); later steps may continue.
    Skipped,
}

impl StepStatus {
    /// Whether the chain continues after this step.
    pub fn proceed(self) -> bool {
        self != StepStatus::NotCalibrated
    }
}

/// Calibration coverage of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCoverage {
    /// Event-class bins.
    pub bins: usize,
    /// Bins that reached Ready.
    pub ready_bins: usize,
}

impl StepCoverage {
    /// Fraction of bins that reached Ready.
    pub fn fraction(&self) -> f64 {
        if self.bins == 0 { 0.0 } else { self.ready_bins as f64 / self.bins as f64 }
    }
}

/// Per-event state of one detector configuration.
#[derive(Debug, Clone, Default)]
pub struct QnEvent {
    /// Accepted data vectors.
    pub data: Vec<DataVector>,
    /// Qn from raw weights.
    pub raw: QVector,
    /// Qn from equalized weights, before Qn-vector corrections.
    pub plain: QVector,
    /// Double-harmonic companion of `plain` (slot `h` holds harmonic `2h`).
    pub plain_2n: QVector,
    /// Latest corrected Qn.
    pub corrected: QVector,
}

impl QnEvent {
    /// Empty state with the given harmonic set.
    pub fn new(harmonics: &[u8]) -> Result<Self> {
        let q = QVector::new(harmonics)?;
        Ok(Self {
            data: Vec::new(),
            raw: q.clone(),
            plain: q.clone(),
            plain_2n: q.clone(),
            corrected: q,
        })
    }

    /// Reset vectors and drop the data bank.
    pub fn clear(&mut self) {
        self.data.clear();
        self.raw.reset();
        self.plain.reset();
        self.plain_2n.reset();
        self.corrected.reset();
    }
}

/// Read-only inputs of a step invocation.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Current variable snapshot.
    pub values: &'a [f64],
    /// Event-class bin of the current event.
    pub class_bin: usize,
    /// Normalization of the owning configuration.
    pub normalization: Normalization,
    /// Latest Qn vector of every configuration, by global index.
    pub peers: &'a [QVector],
}

/// Profiles plus readiness shared by all step kinds.
#[derive(Debug, Clone)]
pub struct Calibration {
    owner: String,
    step: &'static str,
    profiles: Vec<CalibrationProfile>,
    state: CalibrationState,
}

impl Calibration {
    /// Calibration for `step` of configuration `owner`.
    pub fn new(
        owner: &str,
        step: &'static str,
        profiles: Vec<CalibrationProfile>,
        n_bins: usize,
        min_entries: u64,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            step,
            profiles,
            state: CalibrationState::new(n_bins, min_entries),
        }
    }

    /// Profile `i`.
    pub fn profile(&self, i: usize) -> &CalibrationProfile {
        &self.profiles[i]
    }

    /// Mutable profile `i`.
    pub fn profile_mut(&mut self, i: usize) -> &mut CalibrationProfile {
        &mut self.profiles[i]
    }

    /// All profiles.
    pub fn profiles(&self) -> &[CalibrationProfile] {
        &self.profiles
    }

    /// Readiness state.
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Whether `bin` is Ready.
    pub fn is_ready(&self, bin: usize) -> bool {
        self.state.is_ready(bin)
    }

    /// Count one collected event for `bin`.
    pub fn record(&mut self, bin: usize) {
        if self.state.record(bin) {
            log::debug!(
                "{}/{}: event-class bin {bin} ready after {} entries",
                self.owner,
                self.step,
                self.state.entries(bin)
            );
        }
    }

    /// Drop every collected entry; all bins start accumulating again.
    pub fn reset(&mut self) {
        for p in &mut self.profiles {
            p.clear();
        }
        self.state.reset();
    }

    /// Coverage summary.
    pub fn coverage(&self) -> StepCoverage {
        StepCoverage { bins: self.state.n_bins(), ready_bins: self.state.ready_bins() }
    }

    /// Write every profile into `store`.
    pub fn export(&self, store: &mut CalibrationStore) {
        for p in &self.profiles {
            store.insert(&self.owner, self.step, p.clone());
        }
    }

    /// Replace profiles with the ingress ones found in `store`.
    ///
    /// Returns `false` when the store holds none of this step's profiles.
    /// Readiness is re-seeded from the first profile's entries.
    pub fn attach(&mut self, store: &CalibrationStore) -> Result<bool> {
        let mut attached = false;
        for p in &mut self.profiles {
            if let Some(ingress) = store.get(&self.owner, self.step, p.name()) {
                p.check_compatible(ingress)?;
                *p = ingress.clone();
                attached = true;
            }
        }
        if attached && let Some(first) = self.profiles.first() {
            self.state.seed_from(first);
            log::info!(
                "{}/{}: attached calibration, {}/{} bins ready",
                self.owner,
                self.step,
                self.state.ready_bins(),
                self.state.n_bins()
            );
        }
        Ok(attached)
    }
}

/// Capability shared by every correction algorithm.
pub trait CorrectionStep: std::fmt::Debug + Send {
    /// Step key, e.g. `"recentering"`.
    fn name(&self) -> &'static str;

    /// Input-data or Qn-vector stage.
    fn stage(&self) -> StepStage;

    /// Global ordering level among Qn-vector steps (lower runs first).
    fn priority(&self) -> u8 {
        0
    }

    /// Resolve named peer configurations to global indices.
    fn resolve_peers(&mut self, _lookup: &dyn Fn(&str) -> Option<usize>) -> Result<()> {
        Ok(())
    }

    /// Apply the correction to the current event if calibrated.
    fn process_corrections(&mut self, ctx: &StepContext<'_>, event: &mut QnEvent)
    -> Result<StepStatus>;

    /// Accumulate calibration statistics for the current event.
    fn process_data_collection(&mut self, ctx: &StepContext<'_>, event: &QnEvent)
    -> Result<StepStatus>;

    /// Drop per-event state.
    fn clear_correction_step(&mut self);

    /// Calibration bookkeeping.
    fn calibration(&self) -> &Calibration;

    /// Mutable calibration bookkeeping.
    fn calibration_mut(&mut self) -> &mut Calibration;

    /// Whether `class_bin` is Ready.
    fn is_calibrated(&self, class_bin: usize) -> bool {
        self.calibration().is_ready(class_bin)
    }

    /// Fraction of event-class bins that reached Ready.
    fn coverage(&self) -> StepCoverage {
        self.calibration().coverage()
    }

    /// Write this step's profiles into `store`.
    fn export(&self, store: &mut CalibrationStore) {
        self.calibration().export(store);
    }

    /// Load ingress profiles from `store`.
    fn attach_inputs(&mut self, store: &CalibrationStore) -> Result<bool> {
        self.calibration_mut().attach(store)
    }

    /// Forget all collected calibration.
    fn reset_calibration(&mut self) {
        self.clear_correction_step();
        self.calibration_mut().reset();
    }
}

/// Profile with two components (x, y) per harmonic.
pub(crate) fn xy_profile(name: &str, event_axes: &[Axis], harmonics: &[u8]) -> Result<CalibrationProfile> {
    CalibrationProfile::new(name, event_axes, 2 * harmonics.len())
}
