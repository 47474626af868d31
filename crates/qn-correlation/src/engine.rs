//! Per-event correlation accumulation over event classes.

use std::collections::BTreeMap;

use qn_core::{BinnedContainer, Error, QVector, ResampledStatistic, Resampler, ResamplingConfig, Result};
use qn_correction::{CorrectionCalculator, EventClassSet};

use crate::correlation::{Combiner, Correlation, CorrelationResult, WeightTag};

/// Named flow-vector containers of the current event.
#[derive(Debug, Clone, Default)]
pub struct QnInputs {
    containers: BTreeMap<String, BinnedContainer<QVector>>,
}

impl QnInputs {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`.
    pub fn insert(&mut self, name: impl Into<String>, container: BinnedContainer<QVector>) {
        self.containers.insert(name.into(), container);
    }

    /// Container `name`.
    pub fn get(&self, name: &str) -> Option<&BinnedContainer<QVector>> {
        self.containers.get(name)
    }

    /// Store the vectors of `detector` at `stage` under the detector name.
    pub fn capture(&mut self, calculator: &CorrectionCalculator, detector: &str, stage: &str) -> Result<()> {
        self.insert(detector, calculator.qn_container(detector, stage)?);
        Ok(())
    }
}

/// Accumulates registered correlations per event class with resampling.
#[derive(Debug)]
pub struct CorrelationEngine {
    event_classes: EventClassSet,
    resampler: Resampler,
    template: ResampledStatistic,
    correlations: Vec<Correlation>,
    events: u64,
    accepted_events: u64,
}

impl CorrelationEngine {
    /// Engine binned by `event_classes`, resampling as configured.
    pub fn new(event_classes: EventClassSet, resampling: &ResamplingConfig) -> Result<Self> {
        let resampler = resampling.build()?;
        Ok(Self {
            template: resampler.statistic(),
            event_classes,
            resampler,
            correlations: Vec::new(),
            events: 0,
            accepted_events: 0,
        })
    }

    /// Register correlation `name` of `inputs`, all tagged [`WeightTag::Reference`].
    pub fn add_correlation(
        &mut self,
        name: &str,
        inputs: &[&str],
        combiner: impl Fn(&[&QVector]) -> f64 + Send + Sync + 'static,
    ) -> Result<()> {
        if self.correlation(name).is_some() {
            return Err(Error::Validation(format!("correlation '{name}' added twice")));
        }
        let inputs = inputs.iter().map(|s| s.to_string()).collect();
        let combiner: Combiner = Box::new(combiner);
        self.correlations.push(Correlation::new(name, inputs, combiner)?);
        Ok(())
    }

    /// Set the weight tags of correlation `name`.
    pub fn set_weights(&mut self, name: &str, weights: &[WeightTag]) -> Result<()> {
        self.correlations
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::Validation(format!("unknown correlation '{name}'")))?
            .set_weights(weights)
    }

    /// Registered correlations.
    pub fn correlations(&self) -> &[Correlation] {
        &self.correlations
    }

    /// Correlation by name.
    pub fn correlation(&self, name: &str) -> Option<&Correlation> {
        self.correlations.iter().find(|c| c.name() == name)
    }

    /// Resampler in use.
    pub fn resampler(&self) -> &Resampler {
        &self.resampler
    }

    /// Events offered.
    pub fn n_events(&self) -> u64 {
        self.events
    }

    /// Events inside the event-class binning.
    pub fn n_accepted(&self) -> u64 {
        self.accepted_events
    }

    /// Accumulate every correlation for the current event.
    ///
    /// Returns `false` if the event falls outside the event classes. Unknown
    /// input names are a validation error.
    pub fn process(&mut self, values: &[f64], inputs: &QnInputs) -> Result<bool> {
        self.events += 1;
        let Some(event_bin) = self.event_classes.bin(values) else {
            return Ok(false);
        };
        let weights = self.resampler.next_event();
        for correlation in &mut self.correlations {
            let containers = correlation
                .inputs()
                .iter()
                .map(|name| {
                    inputs.get(name).ok_or_else(|| {
                        Error::Validation(format!(
                            "correlation '{}': no input named '{name}'",
                            correlation.name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            correlation.fill(
                &containers,
                self.event_classes.axes(),
                event_bin,
                &self.template,
                weights,
            )?;
        }
        self.accepted_events += 1;
        Ok(true)
    }

    /// Nominal and resampled results of every correlation that saw an event.
    pub fn finalize(&self) -> Vec<CorrelationResult> {
        let results: Vec<CorrelationResult> = self
            .correlations
            .iter()
            .filter_map(|c| c.result().map(|r| CorrelationResult::from_binned(c.name(), r.clone())))
            .collect();
        for c in &self.correlations {
            if c.result().is_none() {
                log::warn!("correlation '{}' received no events", c.name());
            } else if c.dropped() > 0 {
                log::warn!("correlation '{}': {} non-finite values dropped", c.name(), c.dropped());
            }
        }
        log::info!(
            "correlations: {} results from {} of {} events, {:?} resampling with {} realizations",
            results.len(),
            self.accepted_events,
            self.events,
            self.resampler.method(),
            self.resampler.realizations()
        );
        results
    }
}
