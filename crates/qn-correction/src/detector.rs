//! Detector configurations and the binned detector front-end.
//!
//! A [`DetectorConfiguration`] owns one event-class-binned correction chain:
//! it collects data vectors, builds the raw and plain Qn vectors and drives
//! its input-data and Qn-vector steps. Tracking and channelized detectors are
//! two implementations sharing a [`DetectorCore`].
//!
//! A [`Detector`] reads its angles and weights from the variable snapshot and
//! routes every accepted element to the configuration of its own binning
//! (one configuration per bin, named `name` when unbinned and `name{bin}`
//! otherwise).

use qn_core::{
    Axis, BinnedContainer, CutsSet, Error, Normalization, QVector, Result, Variable,
};
use serde::{Deserialize, Serialize};

use crate::data_vector::DataVector;
use crate::profile::{CalibrationProfile, CalibrationStore};
use crate::steps::{CorrectionStep, QnEvent, StepContext, StepCoverage, StepStage};

/// Step key under which QA profiles are exported.
pub const QA: &str = "qa";

/// Detector read-out type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Individually reconstructed tracks.
    Tracking,
    /// Segmented read-out with fixed channels.
    Channelized,
}

/// Per-event progress of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    /// Never used.
    Idle,
    /// Accepting data vectors.
    DataCollection,
    /// Raw Qn built.
    RawBuilt,
    /// Input-data corrections done.
    InputCorrected,
    /// Plain Qn built.
    QnBuilt,
    /// Qn-vector corrections done.
    QnCorrected,
}

/// Channel usage, grouping and fixed weights of a channelized detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelScheme {
    used: Vec<bool>,
    #[serde(default)]
    groups: Option<Vec<usize>>,
    #[serde(default)]
    hard_coded_weights: Option<Vec<f64>>,
}

impl ChannelScheme {
    /// Validated scheme. `groups` and `hard_coded_weights` must match `used` in length.
    pub fn new(
        used: Vec<bool>,
        groups: Option<Vec<usize>>,
        hard_coded_weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        let scheme = Self { used, groups, hard_coded_weights };
        scheme.validate()?;
        Ok(scheme)
    }

    /// Every one of `n` channels used, no groups.
    pub fn all_used(n: usize) -> Self {
        Self { used: vec![true; n], groups: None, hard_coded_weights: None }
    }

    /// Check lengths, group ids and weights. Group ids must be below the channel count.
    pub fn validate(&self) -> Result<()> {
        let n = self.used.len();
        if n == 0 {
            return Err(Error::Validation("channel scheme has no channels".into()));
        }
        if let Some(g) = &self.groups {
            if g.len() != n {
                return Err(Error::Validation(format!(
                    "channel scheme: {} group ids for {n} channels",
                    g.len()
                )));
            }
            if let Some(&id) = g.iter().find(|&&id| id >= n) {
                return Err(Error::Validation(format!(
                    "channel scheme: group id {id} out of range for {n} channels"
                )));
            }
        }
        if let Some(w) = &self.hard_coded_weights {
            if w.len() != n {
                return Err(Error::Validation(format!(
                    "channel scheme: {} hard-coded weights for {n} channels",
                    w.len()
                )));
            }
            if w.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation("channel scheme: non-finite hard-coded weight".into()));
            }
        }
        Ok(())
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.used.len()
    }

    /// Whether `channel` participates.
    pub fn is_used(&self, channel: usize) -> bool {
        self.used.get(channel).copied().unwrap_or(false)
    }

    /// Group of `channel`, if groups are defined.
    pub fn group(&self, channel: usize) -> Option<usize> {
        self.groups.as_ref().and_then(|g| g.get(channel).copied())
    }

    /// Number of groups (largest group id + 1).
    pub fn n_groups(&self) -> usize {
        self.groups.as_ref().and_then(|g| g.iter().max()).map_or(0, |m| m.saturating_add(1))
    }

    /// Fixed weight factor of `channel` (1 when none).
    pub fn hard_coded_weight(&self, channel: usize) -> f64 {
        self.hard_coded_weights.as_ref().and_then(|w| w.get(channel).copied()).unwrap_or(1.0)
    }
}

/// State and correction chain shared by both configuration kinds.
#[derive(Debug)]
pub struct DetectorCore {
    name: String,
    id: usize,
    harmonics: Vec<u8>,
    normalization: Normalization,
    cuts: CutsSet,
    input_steps: Vec<Box<dyn CorrectionStep>>,
    qn_steps: Vec<Box<dyn CorrectionStep>>,
    event: QnEvent,
    stages: Vec<(&'static str, QVector)>,
    proceed: bool,
    state: PipelineState,
    qa_multiplicity: CalibrationProfile,
    qa_plain: CalibrationProfile,
}

impl DetectorCore {
    /// Core for configuration `name`.
    pub fn new(
        name: impl Into<String>,
        event_axes: &[Axis],
        harmonics: &[u8],
        normalization: Normalization,
        cuts: CutsSet,
    ) -> Result<Self> {
        let name = name.into();
        if harmonics.is_empty() {
            return Err(Error::Validation(format!("{name}: no harmonics requested")));
        }
        let event = QnEvent::new(harmonics)?;
        Ok(Self {
            qa_multiplicity: CalibrationProfile::new("multiplicity", event_axes, 1)?,
            qa_plain: CalibrationProfile::new("plain_qn", event_axes, 2 * harmonics.len())?,
            name,
            id: 0,
            harmonics: harmonics.to_vec(),
            normalization,
            cuts,
            input_steps: Vec::new(),
            qn_steps: Vec::new(),
            event,
            stages: Vec::new(),
            proceed: true,
            state: PipelineState::Idle,
        })
    }

    /// Configuration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global index assigned by the calculator.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Active harmonics.
    pub fn harmonics(&self) -> &[u8] {
        &self.harmonics
    }

    /// Normalization applied when building Qn vectors.
    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Current event data.
    pub fn event(&self) -> &QnEvent {
        &self.event
    }

    /// Input-data steps in registration order.
    pub fn input_steps(&self) -> &[Box<dyn CorrectionStep>] {
        &self.input_steps
    }

    /// Qn-vector steps ordered by priority.
    pub fn qn_steps(&self) -> &[Box<dyn CorrectionStep>] {
        &self.qn_steps
    }

    /// QA profiles (multiplicity, plain Qn components).
    pub fn qa_profiles(&self) -> [&CalibrationProfile; 2] {
        [&self.qa_multiplicity, &self.qa_plain]
    }

    fn add_step(&mut self, step: Box<dyn CorrectionStep>) -> Result<()> {
        let steps = match step.stage() {
            StepStage::InputData => &mut self.input_steps,
            StepStage::QnVector => &mut self.qn_steps,
        };
        if steps.iter().any(|s| s.name() == step.name()) {
            return Err(Error::Validation(format!(
                "{}: step '{}' added twice",
                self.name,
                step.name()
            )));
        }
        steps.push(step);
        self.qn_steps.sort_by_key(|s| s.priority());
        Ok(())
    }

    fn push_data_vector(&mut self, dv: DataVector) {
        self.event.data.push(dv);
    }

    fn build(&self, q: &mut QVector, weight: impl Fn(&DataVector) -> f64, multiplier: f64) {
        q.reset();
        for dv in &self.event.data {
            q.add_particle(multiplier * dv.phi, weight(dv));
        }
        q.check_quality();
        q.normalize(self.normalization);
    }

    /// Latest Qn vector (after every step run so far).
    pub fn latest(&self) -> &QVector {
        &self.event.corrected
    }

    /// Qn vector at a named stage: `"raw"`, `"plain"`, or a step key.
    ///
    /// A step that did not run this event yields the latest vector.
    pub fn qn_vector(&self, stage: &str) -> &QVector {
        match stage {
            "raw" => &self.event.raw,
            "plain" => &self.event.plain,
            _ => self
                .stages
                .iter()
                .find(|(name, _)| *name == stage)
                .map_or(&self.event.corrected, |(_, q)| q),
        }
    }

    fn ctx<'a>(&self, values: &'a [f64], class_bin: usize, peers: &'a [QVector]) -> StepContext<'a> {
        StepContext { values, class_bin, normalization: self.normalization, peers }
    }

    /// Build the raw vector, run input corrections and build the plain vector.
    ///
    /// Returns `false` when an input step stopped the chain.
    pub fn process_input(&mut self, values: &[f64], class_bin: usize) -> Result<bool> {
        let mut raw = std::mem::take(&mut self.event.raw);
        self.build(&mut raw, |dv| dv.weight, 1.0);
        self.event.raw = raw;
        self.state = PipelineState::RawBuilt;

        let ctx = self.ctx(values, class_bin, &[]);
        for step in &mut self.input_steps {
            if !step.process_corrections(&ctx, &mut self.event)?.proceed() {
                self.proceed = false;
                return Ok(false);
            }
        }
        self.state = PipelineState::InputCorrected;

        let mut plain = std::mem::take(&mut self.event.plain);
        let mut plain_2n = std::mem::take(&mut self.event.plain_2n);
        self.build(&mut plain, |dv| dv.equalized_weight, 1.0);
        self.build(&mut plain_2n, |dv| dv.equalized_weight, 2.0);
        self.event.corrected = plain.clone();
        self.event.plain = plain;
        self.event.plain_2n = plain_2n;
        self.state = PipelineState::QnBuilt;
        Ok(true)
    }

    /// Run the Qn-vector steps of priority `level`, unless the chain stopped.
    pub fn run_level(
        &mut self,
        level: u8,
        values: &[f64],
        class_bin: usize,
        peers: &[QVector],
    ) -> Result<()> {
        if !self.proceed || self.state < PipelineState::QnBuilt {
            return Ok(());
        }
        let ctx = self.ctx(values, class_bin, peers);
        for step in self.qn_steps.iter_mut().filter(|s| s.priority() == level) {
            let status = step.process_corrections(&ctx, &mut self.event)?;
            self.stages.push((step.name(), self.event.corrected.clone()));
            if !status.proceed() {
                self.proceed = false;
                break;
            }
        }
        Ok(())
    }

    /// Mark the Qn-vector corrections as finished for this event.
    pub fn finish_corrections(&mut self) {
        if self.state == PipelineState::QnBuilt {
            self.state = PipelineState::QnCorrected;
        }
    }

    /// Accumulate calibration and QA statistics, in correction order.
    pub fn process_data_collection(&mut self, values: &[f64], class_bin: usize) -> Result<bool> {
        let ctx = self.ctx(values, class_bin, &[]);
        for step in &mut self.input_steps {
            if !step.process_data_collection(&ctx, &self.event)?.proceed() {
                return Ok(false);
            }
        }

        self.qa_multiplicity.fill(class_bin, 0, self.event.raw.sum_weights());
        if self.event.plain.is_good_quality() {
            for (k, &h) in self.harmonics.iter().enumerate() {
                let q = self.event.plain.q(h);
                self.qa_plain.fill(class_bin, 2 * k, q.x);
                self.qa_plain.fill(class_bin, 2 * k + 1, q.y);
            }
        }

        for step in &mut self.qn_steps {
            if !step.process_data_collection(&ctx, &self.event)?.proceed() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reset per-event state; calibration is untouched.
    pub fn clear(&mut self) {
        for step in self.input_steps.iter_mut().chain(self.qn_steps.iter_mut()) {
            step.clear_correction_step();
        }
        self.event.clear();
        self.stages.clear();
        self.proceed = true;
        self.state = PipelineState::DataCollection;
    }

    /// Coverage of every step, in chain order.
    pub fn coverage(&self) -> Vec<(&'static str, StepCoverage)> {
        self.input_steps.iter().chain(&self.qn_steps).map(|s| (s.name(), s.coverage())).collect()
    }

    /// Export step and QA profiles.
    pub fn export(&self, store: &mut CalibrationStore) {
        for step in self.input_steps.iter().chain(&self.qn_steps) {
            step.export(store);
        }
        store.insert(&self.name, QA, self.qa_multiplicity.clone());
        store.insert(&self.name, QA, self.qa_plain.clone());
    }

    /// Attach ingress profiles. Returns the number of steps that found inputs.
    pub fn attach(&mut self, store: &CalibrationStore) -> Result<usize> {
        let mut n = 0;
        for step in self.input_steps.iter_mut().chain(self.qn_steps.iter_mut()) {
            if step.attach_inputs(store)? {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Forget the calibration of every step and the QA profiles.
    pub fn reset_calibration(&mut self) {
        for step in self.input_steps.iter_mut().chain(self.qn_steps.iter_mut()) {
            step.reset_calibration();
        }
        self.qa_multiplicity.clear();
        self.qa_plain.clear();
    }

    fn resolve_peers(&mut self, lookup: &dyn Fn(&str) -> Option<usize>) -> Result<()> {
        for step in &mut self.qn_steps {
            step.resolve_peers(lookup)?;
        }
        Ok(())
    }
}

/// One event-class-binned correction chain of a detector.
pub trait DetectorConfiguration: std::fmt::Debug + Send {
    /// Shared state.
    fn core(&self) -> &DetectorCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut DetectorCore;

    /// Read-out type.
    fn kind(&self) -> DetectorKind;

    /// Offer one track or channel hit. Returns whether it was accepted.
    fn add_data_vector(&mut self, values: &[f64], phi: f64, weight: f64, channel: usize) -> bool;

    /// Register a correction step.
    fn add_correction_step(&mut self, step: Box<dyn CorrectionStep>) -> Result<()> {
        self.core_mut().add_step(step)
    }

    /// Configuration name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Global index.
    fn id(&self) -> usize {
        self.core().id()
    }

    /// Assign the global index.
    fn set_id(&mut self, id: usize) {
        self.core_mut().id = id;
    }

    /// Resolve peer names of cross-detector steps.
    fn resolve_peers(&mut self, lookup: &dyn Fn(&str) -> Option<usize>) -> Result<()> {
        self.core_mut().resolve_peers(lookup)
    }

    /// Reset per-event state.
    fn clear_configuration(&mut self) {
        self.core_mut().clear();
    }
}

/// Configuration of a tracking detector.
#[derive(Debug)]
pub struct TrackingDetector {
    core: DetectorCore,
}

impl TrackingDetector {
    /// Wrap a core.
    pub fn new(core: DetectorCore) -> Self {
        log::info!("created tracking detector configuration '{}'", core.name());
        Self { core }
    }
}

impl DetectorConfiguration for TrackingDetector {
    fn core(&self) -> &DetectorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DetectorCore {
        &mut self.core
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Tracking
    }

    fn add_data_vector(&mut self, values: &[f64], phi: f64, weight: f64, channel: usize) -> bool {
        if !self.core.cuts.is_selected(values, channel) {
            return false;
        }
        self.core.push_data_vector(DataVector::new(channel, phi, weight));
        true
    }

    fn add_correction_step(&mut self, step: Box<dyn CorrectionStep>) -> Result<()> {
        if step.stage() == StepStage::InputData {
            return Err(Error::Validation(format!(
                "{}: input-data step '{}' needs a channelized detector",
                self.core.name(),
                step.name()
            )));
        }
        self.core.add_step(step)
    }
}

/// Configuration of a channelized detector.
#[derive(Debug)]
pub struct ChannelizedDetector {
    core: DetectorCore,
    scheme: ChannelScheme,
}

impl ChannelizedDetector {
    /// Wrap a core with a channel scheme.
    pub fn new(core: DetectorCore, scheme: ChannelScheme) -> Result<Self> {
        scheme.validate()?;
        log::info!(
            "created channelized detector configuration '{}' with {} channels",
            core.name(),
            scheme.n_channels()
        );
        Ok(Self { core, scheme })
    }

    /// Channel scheme.
    pub fn scheme(&self) -> &ChannelScheme {
        &self.scheme
    }
}

impl DetectorConfiguration for ChannelizedDetector {
    fn core(&self) -> &DetectorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DetectorCore {
        &mut self.core
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Channelized
    }

    fn add_data_vector(&mut self, values: &[f64], phi: f64, weight: f64, channel: usize) -> bool {
        if !self.scheme.is_used(channel) || !self.core.cuts.is_selected(values, channel) {
            return false;
        }
        let weight = weight * self.scheme.hard_coded_weight(channel);
        self.core.push_data_vector(DataVector::new(channel, phi, weight));
        true
    }
}

/// Everything needed to create the per-bin configurations of a detector.
pub struct ConfigurationSpec<'a> {
    /// Event-class axes of every calibration profile.
    pub event_axes: &'a [Axis],
    /// Active harmonics.
    pub harmonics: &'a [u8],
    /// Qn normalization.
    pub normalization: Normalization,
    /// Channel scheme (channelized detectors only).
    pub scheme: Option<ChannelScheme>,
    /// Data-vector cuts.
    pub cuts: CutsSet,
}

/// Detector front-end: reads a snapshot and feeds its per-bin configurations.
#[derive(Debug)]
pub struct Detector {
    name: String,
    kind: DetectorKind,
    phi: Variable,
    weight: Option<Variable>,
    binning: Vec<Variable>,
    layout: BinnedContainer<()>,
    coordinates: Vec<f64>,
    configurations: Vec<Box<dyn DetectorConfiguration>>,
}

impl Detector {
    /// Detector reading angles from `phi` and weights from `weight` (1 when absent).
    ///
    /// `binning` adds per-element axes (e.g. transverse momentum); every bin
    /// gets its own correction chain.
    pub fn new(
        name: impl Into<String>,
        kind: DetectorKind,
        phi: Variable,
        weight: Option<Variable>,
        binning: Vec<(Variable, Axis)>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Validation("detector name is empty".into()));
        }
        if let Some(w) = weight
            && w.length() != phi.length()
            && w.length() != 1
        {
            return Err(Error::Validation(format!(
                "{name}: weight variable has {} elements, angle variable {}",
                w.length(),
                phi.length()
            )));
        }
        let mut layout = BinnedContainer::new();
        let mut variables = Vec::with_capacity(binning.len());
        for (var, axis) in binning {
            if var.length() != phi.length() && var.length() != 1 {
                return Err(Error::Validation(format!(
                    "{name}: binning variable '{}' has {} elements, angle variable {}",
                    axis.name(),
                    var.length(),
                    phi.length()
                )));
            }
            layout.add_axis(axis)?;
            variables.push(var);
        }
        Ok(Self {
            name,
            kind,
            phi,
            weight,
            coordinates: vec![0.0; variables.len()],
            binning: variables,
            layout,
            configurations: Vec::new(),
        })
    }

    /// Create one configuration per bin, each with the steps returned by `make_steps`.
    pub fn configure(
        &mut self,
        spec: ConfigurationSpec<'_>,
        mut make_steps: impl FnMut(&str) -> Result<Vec<Box<dyn CorrectionStep>>>,
    ) -> Result<()> {
        if !self.configurations.is_empty() {
            return Err(Error::Validation(format!("{}: already configured", self.name)));
        }
        if self.kind == DetectorKind::Channelized {
            match &spec.scheme {
                Some(s) if s.n_channels() == self.phi.length() => {}
                Some(s) => {
                    return Err(Error::Validation(format!(
                        "{}: channel scheme has {} channels, angle variable {}",
                        self.name,
                        s.n_channels(),
                        self.phi.length()
                    )));
                }
                None => {}
            }
        }
        for bin in 0..self.layout.len() {
            let name = if self.layout.is_integrated() {
                self.name.clone()
            } else {
                format!("{}{bin}", self.name)
            };
            let core = DetectorCore::new(
                name.clone(),
                spec.event_axes,
                spec.harmonics,
                spec.normalization,
                spec.cuts.clone(),
            )?;
            let mut configuration: Box<dyn DetectorConfiguration> = match self.kind {
                DetectorKind::Tracking => Box::new(TrackingDetector::new(core)),
                DetectorKind::Channelized => {
                    let scheme = spec
                        .scheme
                        .clone()
                        .unwrap_or_else(|| ChannelScheme::all_used(self.phi.length()));
                    Box::new(ChannelizedDetector::new(core, scheme)?)
                }
            };
            for step in make_steps(&name)? {
                configuration.add_correction_step(step)?;
            }
            self.configurations.push(configuration);
        }
        Ok(())
    }

    /// Detector name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-out type.
    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    /// Number of channels (or track slots) in the angle variable.
    pub fn n_elements(&self) -> usize {
        self.phi.length()
    }

    /// Detector binning axes.
    pub fn axes(&self) -> &[Axis] {
        self.layout.axes()
    }

    /// Per-bin configurations.
    pub fn configurations(&self) -> &[Box<dyn DetectorConfiguration>] {
        &self.configurations
    }

    /// Mutable per-bin configurations.
    pub fn configurations_mut(&mut self) -> &mut [Box<dyn DetectorConfiguration>] {
        &mut self.configurations
    }

    /// Offer every element of the snapshot. Returns the number accepted.
    ///
    /// Elements with a non-finite angle or weight are empty slots.
    pub fn fill(&mut self, values: &[f64]) -> usize {
        let mut accepted = 0;
        // Weight and binning variables are scalars or as long as `phi`.
        let read = |var: &Variable, i: usize| var.element(values, i).unwrap_or(f64::NAN);
        for i in 0..self.phi.length() {
            let phi = read(&self.phi, i);
            let weight = self.weight.map_or(1.0, |w| read(&w, i));
            if !phi.is_finite() || !weight.is_finite() {
                continue;
            }
            for (c, var) in self.coordinates.iter_mut().zip(&self.binning) {
                *c = read(var, i);
            }
            let Some(bin) = self.layout.find_bin(&self.coordinates) else {
                continue;
            };
            if let Some(configuration) = self.configurations.get_mut(bin)
                && configuration.add_data_vector(values, phi, weight, i)
            {
                accepted += 1;
            }
        }
        accepted
    }

    /// Qn vectors of every bin at `stage`, non-finite components zeroed and
    /// bad-quality vectors emptied.
    pub fn qn_container(&self, stage: &str) -> Result<BinnedContainer<QVector>> {
        BinnedContainer::from_fn(self.layout.axes().to_vec(), |i| {
            self.configurations
                .get(i)
                .map(|c| {
                    let mut q = c.core().qn_vector(stage).sanitized();
                    if !q.is_good_quality() {
                        q.reset();
                    }
                    q
                })
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::Recentering;
    use approx::assert_relative_eq;
    use qn_core::{CutKind, Cut, VariableSchema};
    use std::f64::consts::FRAC_PI_2;

    fn schema() -> (VariableSchema, Variable, Variable, Variable) {
        let mut s = VariableSchema::new();
        let phi = s.add("Phi", 4).unwrap();
        let mult = s.add("Mult", 4).unwrap();
        let pt = s.add("Pt", 4).unwrap();
        (s, phi, mult, pt)
    }

    fn spec<'a>(axes: &'a [Axis], scheme: Option<ChannelScheme>) -> ConfigurationSpec<'a> {
        ConfigurationSpec {
            event_axes: axes,
            harmonics: &[1, 2],
            normalization: Normalization::None,
            scheme,
            cuts: CutsSet::new(),
        }
    }

    #[test]
    fn channel_scheme_validation() {
        assert!(ChannelScheme::new(vec![true, true], Some(vec![0]), None).is_err());
        assert!(ChannelScheme::new(vec![true], None, Some(vec![f64::NAN])).is_err());
        let s = ChannelScheme::new(vec![true, false, true], Some(vec![0, 1, 1]), Some(vec![2.0, 1.0, 0.5]))
            .unwrap();
        assert_eq!(s.n_groups(), 2);
        assert_eq!(s.group(2), Some(1));
        assert_eq!(s.hard_coded_weight(0), 2.0);
        assert!(!s.is_used(1));
        assert!(!s.is_used(9));
    }

    #[test]
    fn binning_variable_must_match_angle_length() {
        let mut s = VariableSchema::new();
        let phi = s.add("Phi", 4).unwrap();
        let short = s.add("Short", 3).unwrap();
        let cent = s.add("Cent", 1).unwrap();
        let axis = || Axis::uniform("x", 2, 0.0, 1.0).unwrap();
        assert!(Detector::new("TPC", DetectorKind::Tracking, phi, None, vec![(short, axis())]).is_err());
        assert!(Detector::new("TPC", DetectorKind::Tracking, phi, Some(short), vec![]).is_err());
        assert!(Detector::new("TPC", DetectorKind::Tracking, phi, None, vec![(cent, axis())]).is_ok());
    }

    #[test]
    fn channel_scheme_rejects_out_of_range_groups() {
        assert!(matches!(
            ChannelScheme::new(vec![true; 4], Some(vec![0, 1, 4, 0]), None),
            Err(Error::Validation(_))
        ));
        let huge: ChannelScheme = serde_json::from_str(&format!(
            r#"{{"used":[true,true],"groups":[0,{}]}}"#,
            usize::MAX
        ))
        .unwrap();
        assert_eq!(huge.n_groups(), usize::MAX);
        assert!(huge.validate().is_err());
        let core = DetectorCore::new("V0", &[], &[1], Normalization::None, CutsSet::new()).unwrap();
        assert!(ChannelizedDetector::new(core, huge).is_err());
    }

    #[test]
    fn channelized_fill_applies_mask_and_weights() {
        let (_, phi, mult, _) = schema();
        let mut d = Detector::new("V0", DetectorKind::Channelized, phi, Some(mult), vec![]).unwrap();
        let scheme =
            ChannelScheme::new(vec![true, true, false, true], None, Some(vec![1.0, 2.0, 1.0, 1.0])).unwrap();
        d.configure(spec(&[], Some(scheme)), |_| Ok(Vec::new())).unwrap();
        assert_eq!(d.configurations()[0].name(), "V0");

        let mut values = vec![0.0; 12];
        values[..4].copy_from_slice(&[0.0, FRAC_PI_2, 1.0, 2.0]);
        values[4..8].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(d.fill(&values), 3);
        let core = d.configurations_mut()[0].core_mut();
        core.process_input(&values, 0).unwrap();
        assert_relative_eq!(core.event().plain.sum_weights(), 4.0);
        assert_relative_eq!(core.event().plain.y(1), 2.0 + 2.0f64.sin(), epsilon = 1e-12);
        assert_eq!(core.state(), PipelineState::QnBuilt);
    }

    #[test]
    fn binned_tracking_detector_routes_by_bin() {
        let (_, phi, _, pt) = schema();
        let axis = Axis::from_edges("Pt", vec![0.0, 1.0, 2.0]).unwrap();
        let mut d = Detector::new("TPC", DetectorKind::Tracking, phi, None, vec![(pt, axis)]).unwrap();
        d.configure(spec(&[], None), |_| Ok(Vec::new())).unwrap();
        let names: Vec<_> = d.configurations().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["TPC0", "TPC1"]);

        let mut values = vec![0.0; 12];
        values[..4].copy_from_slice(&[0.1, 0.2, f64::NAN, 0.4]);
        values[8..].copy_from_slice(&[0.5, 1.5, 0.5, 7.0]);
        // NaN angle is an empty slot, pt = 7 is outside the binning.
        assert_eq!(d.fill(&values), 2);
        assert_eq!(d.configurations()[0].core().event().data.len(), 1);
        assert_eq!(d.configurations()[1].core().event().data.len(), 1);
    }

    #[test]
    fn tracking_rejects_input_steps_and_applies_cuts() {
        let (_, phi, mult, pt) = schema();
        let mut cuts = CutsSet::new();
        cuts.add(Cut::new(pt, CutKind::Below { threshold: 1.0 }));
        let mut d = Detector::new("TPC", DetectorKind::Tracking, phi, Some(mult), vec![]).unwrap();
        let mut s = spec(&[], None);
        s.cuts = cuts;
        d.configure(s, |_| Ok(Vec::new())).unwrap();
        let mut values = vec![1.0; 12];
        values[8..].copy_from_slice(&[0.5, 1.5, 0.5, 0.9]);
        assert_eq!(d.fill(&values), 3);

        let scheme = ChannelScheme::all_used(4);
        let eq = crate::steps::GainEqualization::new(
            "TPC",
            &[],
            &scheme,
            crate::steps::EqualizationMethod::Average,
            false,
            1,
        )
        .unwrap();
        assert!(d.configurations_mut()[0].add_correction_step(Box::new(eq)).is_err());
    }

    #[test]
    fn clear_resets_event_but_not_calibration() {
        let (_, phi, mult, _) = schema();
        let mut d = Detector::new("V0", DetectorKind::Channelized, phi, Some(mult), vec![]).unwrap();
        d.configure(spec(&[], None), |name| {
            Ok(vec![Box::new(Recentering::new(name, &[], &[1, 2], 1, false)?) as Box<dyn CorrectionStep>])
        })
        .unwrap();
        let values = vec![0.5, 1.0, 1.5, 2.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        d.fill(&values);
        let cfg = &mut d.configurations_mut()[0];
        cfg.core_mut().process_input(&values, 0).unwrap();
        cfg.core_mut().run_level(0, &values, 0, &[]).unwrap();
        cfg.core_mut().process_data_collection(&values, 0).unwrap();
        assert!(cfg.core().qn_steps()[0].is_calibrated(0));
        cfg.clear_configuration();
        assert!(cfg.core().event().data.is_empty());
        assert_eq!(cfg.core().state(), PipelineState::DataCollection);
        assert!(cfg.core().qn_steps()[0].is_calibrated(0));
    }
}
