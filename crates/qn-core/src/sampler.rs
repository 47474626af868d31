//! Resampling for error estimation by realization dispersion.
//!
//! A [`Resampler`] draws, once per event, one integer weight per
//! realization. Accumulating the same event stream into one
//! [`ResampledStatistic`] per bin then yields both the nominal estimate and the
//! spread of the realization estimates.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::Statistic;

/// Resampling scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingMethod {
    /// No realizations.
    #[default]
    None,
    /// Streaming bootstrap: Poisson(1) weight per realization.
    Bootstrap,
    /// Each event belongs to exactly one of the realizations.
    Subsampling,
}

/// Serializable resampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingConfig {
    /// Scheme.
    pub method: ResamplingMethod,
    /// Number of realizations.
    pub realizations: usize,
    /// RNG seed.
    pub seed: u64,
    /// Declared event count for fixed-size subsampling.
    pub event_count: Option<usize>,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self { method: ResamplingMethod::None, realizations: 0, seed: 42, event_count: None }
    }
}

impl ResamplingConfig {
    /// Build the configured resampler.
    pub fn build(&self) -> Result<Resampler> {
        let r = Resampler::new(self.method, self.realizations, self.seed)?;
        Ok(match self.event_count {
            Some(n) => r.with_event_count(n),
            None => r,
        })
    }
}

/// Per-event realization weight generator.
#[derive(Debug, Clone)]
pub struct Resampler {
    method: ResamplingMethod,
    rng: StdRng,
    poisson: Option<Poisson<f64>>,
    weights: Vec<u32>,
    assignment: Option<Vec<u32>>,
    events: usize,
}

impl Resampler {
    /// New resampler. `realizations` is ignored for [`ResamplingMethod::None`].
    pub fn new(method: ResamplingMethod, realizations: usize, seed: u64) -> Result<Self> {
        let realizations = match method {
            ResamplingMethod::None => 0,
            _ if realizations < 2 => {
                return Err(Error::Validation(format!(
                    "resampling needs at least 2 realizations, got {realizations}"
                )));
            }
            _ => realizations,
        };
        let poisson = match method {
            ResamplingMethod::Bootstrap => Some(
                Poisson::new(1.0).map_err(|e| Error::Validation(format!("poisson: {e}")))?,
            ),
            _ => None,
        };
        Ok(Self {
            method,
            rng: StdRng::seed_from_u64(seed),
            poisson,
            weights: vec![0; realizations],
            assignment: None,
            events: 0,
        })
    }

    /// Resampler producing no realizations.
    pub fn disabled() -> Self {
        Self {
            method: ResamplingMethod::None,
            rng: StdRng::seed_from_u64(0),
            poisson: None,
            weights: Vec::new(),
            assignment: None,
            events: 0,
        }
    }

    /// Declare the number of events up front.
    ///
    /// For subsampling, events are then split into equal-size groups by a
    /// seeded permutation instead of independent uniform draws.
    pub fn with_event_count(mut self, n_events: usize) -> Self {
        if self.method == ResamplingMethod::Subsampling && !self.weights.is_empty() {
            let k = self.weights.len();
            let mut assignment: Vec<u32> = (0..n_events).map(|i| (i % k) as u32).collect();
            assignment.shuffle(&mut self.rng);
            self.assignment = Some(assignment);
        }
        self
    }

    /// Scheme in use.
    pub fn method(&self) -> ResamplingMethod {
        self.method
    }

    /// Number of realizations.
    pub fn realizations(&self) -> usize {
        self.weights.len()
    }

    /// Draw the weights for the next event. Call exactly once per event.
    pub fn next_event(&mut self) -> &[u32] {
        match self.method {
            ResamplingMethod::None => {}
            ResamplingMethod::Bootstrap => {
                if let Some(poisson) = &self.poisson {
                    for w in &mut self.weights {
                        *w = poisson.sample(&mut self.rng) as u32;
                    }
                }
            }
            ResamplingMethod::Subsampling => {
                let k = self.weights.len();
                let slot = match &self.assignment {
                    Some(a) if self.events < a.len() => a[self.events] as usize,
                    Some(a) => {
                        if self.events == a.len() {
                            log::warn!(
                                "more than the declared {} events; assigning subsamples at random",
                                a.len()
                            );
                        }
                        self.rng.random_range(0..k)
                    }
                    None => self.rng.random_range(0..k),
                };
                self.weights.iter_mut().for_each(|w| *w = 0);
                self.weights[slot] = 1;
            }
        }
        self.events += 1;
        &self.weights
    }

    /// Weights drawn for the current event.
    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    /// Empty accumulator matching this resampler.
    pub fn statistic(&self) -> ResampledStatistic {
        ResampledStatistic::new(self.method, self.weights.len())
    }
}

/// Nominal statistic plus one statistic per realization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResampledStatistic {
    method: ResamplingMethod,
    nominal: Statistic,
    realizations: Vec<Statistic>,
}

impl ResampledStatistic {
    /// Empty accumulator with `realizations` slots.
    pub fn new(method: ResamplingMethod, realizations: usize) -> Self {
        Self { method, nominal: Statistic::default(), realizations: vec![Statistic::default(); realizations] }
    }

    /// Fill the nominal statistic and each realization with its weight.
    pub fn fill(&mut self, value: f64, weights: &[u32]) {
        self.nominal.fill(value);
        for (r, &k) in self.realizations.iter_mut().zip(weights) {
            r.fill_n(value, k);
        }
    }

    /// Merge a disjoint accumulation with the same layout.
    pub fn merge(&mut self, other: &ResampledStatistic) -> Result<()> {
        if self.realizations.len() != other.realizations.len() {
            return Err(Error::StructuralMismatch(format!(
                "cannot merge {} and {} realizations",
                self.realizations.len(),
                other.realizations.len()
            )));
        }
        self.nominal.merge(&other.nominal);
        for (a, b) in self.realizations.iter_mut().zip(&other.realizations) {
            a.merge(b);
        }
        Ok(())
    }

    /// Nominal statistic.
    pub fn nominal(&self) -> &Statistic {
        &self.nominal
    }

    /// Per-realization statistics.
    pub fn realizations(&self) -> &[Statistic] {
        &self.realizations
    }

    /// Nominal mean.
    pub fn mean(&self) -> f64 {
        self.nominal.mean()
    }

    /// Dispersion error when resampling is enabled, else the nominal error.
    ///
    /// Bootstrap: sample standard deviation of realization means.
    /// Subsampling: that deviation divided by `sqrt(K)`.
    pub fn error(&self) -> f64 {
        let means: Vec<f64> =
            self.realizations.iter().filter(|s| s.entries() > 0).map(Statistic::mean).collect();
        if self.method == ResamplingMethod::None || means.len() < 2 {
            return self.nominal.error();
        }
        let k = means.len() as f64;
        let avg = means.iter().sum::<f64>() / k;
        let var = means.iter().map(|m| (m - avg).powi(2)).sum::<f64>() / (k - 1.0);
        match self.method {
            ResamplingMethod::Subsampling => (var / k).sqrt(),
            _ => var.sqrt(),
        }
    }
}
