//! Event loop driver for all detector configurations.
//!
//! Per accepted event the calculator runs three phases over every
//! configuration, in registration order:
//!
//! 1. build the raw Qn, run input-data corrections, build the plain Qn;
//! 2. for each Qn-step priority level (ascending), snapshot the latest Qn of
//!    every configuration and run that level everywhere, so cross-detector
//!    steps read their peers at a well-defined stage;
//! 3. accumulate calibration and QA statistics in the same order.

use std::collections::{BTreeSet, HashMap};

use qn_core::{BinnedContainer, CutsSet, Error, EventSource, QVector, Result, VariableSchema};

use crate::config::CorrectionConfig;
use crate::detector::{ChannelScheme, ConfigurationSpec, Detector, DetectorConfiguration, DetectorKind};
use crate::event_class::EventClassSet;
use crate::profile::CalibrationStore;
use crate::report::CalibrationReport;

/// Orchestrates detectors over a stream of event snapshots.
#[derive(Debug)]
pub struct CorrectionCalculator {
    schema: VariableSchema,
    event_classes: EventClassSet,
    event_cuts: CutsSet,
    detectors: Vec<Detector>,
    peers: Vec<QVector>,
    levels: Vec<u8>,
    prepared: bool,
    class_bin: Option<usize>,
    events: u64,
    accepted_events: u64,
}

impl CorrectionCalculator {
    /// Calculator over `schema` with the given event classes.
    pub fn new(schema: VariableSchema, event_classes: EventClassSet) -> Self {
        Self {
            schema,
            event_classes,
            event_cuts: CutsSet::new(),
            detectors: Vec::new(),
            peers: Vec::new(),
            levels: Vec::new(),
            prepared: false,
            class_bin: None,
            events: 0,
            accepted_events: 0,
        }
    }

    /// Build and validate everything described by `config`.
    pub fn from_config(schema: &VariableSchema, config: &CorrectionConfig) -> Result<Self> {
        let mut event_classes = EventClassSet::new();
        for binning in &config.event_classes {
            let (variable, axis) = binning.build(schema)?;
            event_classes.add(variable, axis)?;
        }
        let event_axes = event_classes.axes().to_vec();
        let mut calculator = Self::new(schema.clone(), event_classes);
        calculator.set_event_cuts(CutsSet::from_configs(&config.event_cuts, schema)?);

        for dc in &config.detectors {
            let phi = schema.get(&dc.phi)?;
            let weight = dc.weight.as_deref().map(|w| schema.get(w)).transpose()?;
            let binning = dc.binning.iter().map(|b| b.build(schema)).collect::<Result<Vec<_>>>()?;
            let mut detector = Detector::new(dc.name.clone(), dc.kind, phi, weight, binning)?;

            let scheme = match (dc.kind, &dc.channels) {
                (DetectorKind::Channelized, Some(s)) => Some(s.clone()),
                (DetectorKind::Channelized, None) => {
                    Some(ChannelScheme::all_used(phi.length()))
                }
                (DetectorKind::Tracking, Some(_)) => {
                    return Err(Error::Validation(format!(
                        "{}: channel scheme given for a tracking detector",
                        dc.name
                    )));
                }
                (DetectorKind::Tracking, None) => None,
            };
            let spec = ConfigurationSpec {
                event_axes: &event_axes,
                harmonics: &dc.harmonics,
                normalization: dc.normalization,
                scheme: scheme.clone(),
                cuts: CutsSet::from_configs(&dc.cuts, schema)?,
            };
            detector.configure(spec, |owner| {
                dc.steps
                    .iter()
                    .map(|s| s.build(owner, &event_axes, &dc.harmonics, scheme.as_ref()))
                    .collect()
            })?;
            calculator.add_detector(detector)?;
        }
        calculator.prepare()?;
        Ok(calculator)
    }

    /// Replace the event selection.
    pub fn set_event_cuts(&mut self, cuts: CutsSet) {
        self.event_cuts = cuts;
    }

    /// Register a configured detector.
    pub fn add_detector(&mut self, mut detector: Detector) -> Result<()> {
        if detector.configurations().is_empty() {
            return Err(Error::Validation(format!("{}: detector not configured", detector.name())));
        }
        if self.detector(detector.name()).is_some() {
            return Err(Error::Validation(format!("detector '{}' added twice", detector.name())));
        }
        for c in detector.configurations() {
            if self.configuration(c.name()).is_some() {
                return Err(Error::Validation(format!(
                    "configuration name '{}' is not unique",
                    c.name()
                )));
            }
        }
        for c in detector.configurations_mut() {
            c.set_id(self.peers.len());
            self.peers.push(QVector::new(c.core().harmonics())?);
        }
        self.detectors.push(detector);
        self.prepared = false;
        Ok(())
    }

    /// Resolve cross-detector references and collect the priority levels.
    ///
    /// Called automatically before the first event.
    pub fn prepare(&mut self) -> Result<()> {
        let ids: HashMap<String, usize> = self
            .configurations()
            .map(|c| (c.name().to_string(), c.id()))
            .collect();
        let lookup = |name: &str| ids.get(name).copied();
        let mut levels = BTreeSet::new();
        for d in &mut self.detectors {
            for c in d.configurations_mut() {
                c.resolve_peers(&lookup)?;
                levels.extend(c.core().qn_steps().iter().map(|s| s.priority()));
            }
        }
        self.levels = levels.into_iter().collect();
        self.prepared = true;
        Ok(())
    }

    /// Variable schema.
    pub fn schema(&self) -> &VariableSchema {
        &self.schema
    }

    /// Event-class binning.
    pub fn event_classes(&self) -> &EventClassSet {
        &self.event_classes
    }

    /// Registered detectors.
    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Detector by name.
    pub fn detector(&self, name: &str) -> Option<&Detector> {
        self.detectors.iter().find(|d| d.name() == name)
    }

    /// Every configuration, in global index order.
    pub fn configurations(&self) -> impl Iterator<Item = &dyn DetectorConfiguration> {
        self.detectors.iter().flat_map(|d| d.configurations().iter().map(|c| c.as_ref()))
    }

    /// Configuration by name.
    pub fn configuration(&self, name: &str) -> Option<&dyn DetectorConfiguration> {
        self.configurations().find(|c| c.name() == name)
    }

    /// Event-class bin of the current event, `None` if rejected.
    pub fn class_bin(&self) -> Option<usize> {
        self.class_bin
    }

    /// Events offered so far.
    pub fn n_events(&self) -> u64 {
        self.events
    }

    /// Events accepted so far.
    pub fn n_accepted(&self) -> u64 {
        self.accepted_events
    }

    /// Clear per-event state of every configuration.
    pub fn reset(&mut self) {
        for d in &mut self.detectors {
            for c in d.configurations_mut() {
                c.clear_configuration();
            }
        }
        self.class_bin = None;
    }

    /// Start a new run: drop all collected calibration and QA statistics
    /// and zero the event counters. Attached inputs are dropped too.
    pub fn reset_calibration(&mut self) {
        self.reset();
        for d in &mut self.detectors {
            for c in d.configurations_mut() {
                c.core_mut().reset_calibration();
            }
        }
        self.events = 0;
        self.accepted_events = 0;
        log::info!("calibration reset for {} detectors", self.detectors.len());
    }

    /// Apply event cuts, find the event class and fill every detector.
    ///
    /// Returns whether the event is accepted.
    pub fn fill_detectors(&mut self, values: &[f64]) -> bool {
        self.events += 1;
        if !self.event_cuts.is_selected(values, 0) {
            return false;
        }
        let Some(bin) = self.event_classes.bin(values) else {
            return false;
        };
        self.class_bin = Some(bin);
        for d in &mut self.detectors {
            d.fill(values);
        }
        true
    }

    /// Run the three correction phases on the current event.
    pub fn process_qn_vectors(&mut self, values: &[f64]) -> Result<()> {
        let Some(bin) = self.class_bin else {
            return Ok(());
        };
        if !self.prepared {
            self.prepare()?;
        }

        for d in &mut self.detectors {
            for c in d.configurations_mut() {
                c.core_mut().process_input(values, bin)?;
            }
        }

        for &level in &self.levels {
            let configurations = self.detectors.iter().flat_map(|d| d.configurations());
            for (slot, c) in self.peers.iter_mut().zip(configurations) {
                slot.clone_from(c.core().latest());
            }
            for d in &mut self.detectors {
                for c in d.configurations_mut() {
                    c.core_mut().run_level(level, values, bin, &self.peers)?;
                }
            }
        }

        for d in &mut self.detectors {
            for c in d.configurations_mut() {
                let core = c.core_mut();
                core.finish_corrections();
                core.process_data_collection(values, bin)?;
            }
        }
        self.accepted_events += 1;
        Ok(())
    }

    /// Reset, fill and process one snapshot. Returns whether it was accepted.
    pub fn process_event(&mut self, values: &[f64]) -> Result<bool> {
        self.reset();
        if !self.fill_detectors(values) {
            return Ok(false);
        }
        self.process_qn_vectors(values)?;
        Ok(true)
    }

    /// Drive a full pass over `source`, then [`finalize`](Self::finalize).
    pub fn run(&mut self, source: &mut impl EventSource) -> Result<CalibrationReport> {
        let mut values = self.schema.new_values();
        while source.next_event(&mut values)? {
            self.process_event(&values)?;
        }
        Ok(self.finalize())
    }

    /// Coverage of every step, logged.
    pub fn finalize(&self) -> CalibrationReport {
        let mut report = CalibrationReport::new(self.events, self.accepted_events);
        for c in self.configurations() {
            for (step, coverage) in c.core().coverage() {
                report.push(c.name(), step, coverage);
            }
        }
        report.log();
        report
    }

    /// Every step and QA profile, keyed `configuration/step/profile`.
    pub fn export_calibration(&self) -> CalibrationStore {
        let mut store = CalibrationStore::new();
        for c in self.configurations() {
            c.core().export(&mut store);
        }
        store
    }

    /// Attach ingress profiles. Returns the number of steps that found inputs.
    pub fn attach_calibration(&mut self, store: &CalibrationStore) -> Result<usize> {
        let mut n = 0;
        for d in &mut self.detectors {
            for c in d.configurations_mut() {
                n += c.core_mut().attach(store)?;
            }
        }
        Ok(n)
    }

    /// Current Qn vectors of `detector` at `stage` (`"raw"`, `"plain"` or a step key).
    pub fn qn_container(&self, detector: &str, stage: &str) -> Result<BinnedContainer<QVector>> {
        self.detector(detector)
            .ok_or_else(|| Error::Validation(format!("unknown detector '{detector}'")))?
            .qn_container(stage)
    }
}
