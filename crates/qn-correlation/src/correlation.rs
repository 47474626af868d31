//! A named scalar function of several flow vectors, binned and accumulated.

use std::fmt;

use qn_core::{
    Axis, BinnedContainer, Error, QVector, ResampledStatistic, Result, Statistic,
};
use serde::{Deserialize, Serialize};

/// Role of an input in resampling and bin selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightTag {
    /// Large, self-averaging reference vector. Never excludes a bin.
    #[default]
    Reference,
    /// Observable vector. An empty or bad-quality vector excludes its bin.
    Observable,
}

/// Scalar combination of the input vectors of one bin combination.
pub type Combiner = Box<dyn Fn(&[&QVector]) -> f64 + Send + Sync>;

/// One registered correlation.
pub struct Correlation {
    name: String,
    inputs: Vec<String>,
    weights: Vec<WeightTag>,
    combiner: Combiner,
    input_axes: Vec<Vec<Axis>>,
    result: Option<BinnedContainer<ResampledStatistic>>,
    dropped: u64,
}

impl fmt::Debug for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlation")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("weights", &self.weights)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl Correlation {
    /// Correlation `name` of `inputs`, all tagged [`WeightTag::Reference`].
    pub fn new(name: impl Into<String>, inputs: Vec<String>, combiner: Combiner) -> Result<Self> {
        let name = name.into();
        if inputs.is_empty() {
            return Err(Error::Validation(format!("correlation '{name}' has no inputs")));
        }
        Ok(Self {
            weights: vec![WeightTag::Reference; inputs.len()],
            name,
            inputs,
            combiner,
            input_axes: Vec::new(),
            result: None,
            dropped: 0,
        })
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input names in argument order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Weight tags, one per input.
    pub fn weights(&self) -> &[WeightTag] {
        &self.weights
    }

    /// Replace the weight tags.
    pub fn set_weights(&mut self, weights: &[WeightTag]) -> Result<()> {
        if weights.len() != self.inputs.len() {
            return Err(Error::Validation(format!(
                "correlation '{}': {} weight tags for {} inputs",
                self.name,
                weights.len(),
                self.inputs.len()
            )));
        }
        self.weights = weights.to_vec();
        Ok(())
    }

    /// Values dropped as non-finite.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Accumulated result, `None` before the first event.
    pub fn result(&self) -> Option<&BinnedContainer<ResampledStatistic>> {
        self.result.as_ref()
    }

    fn initialize(
        &mut self,
        containers: &[&BinnedContainer<QVector>],
        event_axes: &[Axis],
        template: &ResampledStatistic,
    ) -> Result<()> {
        let taken = |name: &str, own: usize| {
            event_axes.iter().any(|a| a.name() == name)
                || containers
                    .iter()
                    .enumerate()
                    .any(|(i, c)| i != own && c.axes().iter().any(|a| a.name() == name))
        };
        let mut axes = Vec::new();
        for (i, c) in containers.iter().enumerate() {
            for axis in c.axes() {
                let mut axis = axis.clone();
                if taken(axis.name(), i) {
                    axis.set_name(format!("{}_{}", self.inputs[i], axis.name()));
                }
                axes.push(axis);
            }
        }
        axes.extend(event_axes.iter().cloned());
        self.result = Some(BinnedContainer::from_fn(axes, |_| template.clone())?);
        self.input_axes = containers.iter().map(|c| c.axes().to_vec()).collect();
        Ok(())
    }

    pub(crate) fn fill(
        &mut self,
        containers: &[&BinnedContainer<QVector>],
        event_axes: &[Axis],
        event_bin: usize,
        template: &ResampledStatistic,
        weights: &[u32],
    ) -> Result<()> {
        if self.result.is_none() {
            self.initialize(containers, event_axes, template)?;
        }
        for (i, c) in containers.iter().enumerate() {
            if c.axes() != self.input_axes[i].as_slice() {
                return Err(Error::StructuralMismatch(format!(
                    "correlation '{}': binning of input '{}' changed",
                    self.name, self.inputs[i]
                )));
            }
        }
        let Some(result) = self.result.as_mut() else {
            return Ok(());
        };
        let n_event_bins: usize = event_axes.iter().map(Axis::len).product();
        let sizes: Vec<usize> = containers.iter().map(|c| c.len()).collect();
        let combinations: usize = sizes.iter().product();

        let mut qs: Vec<&QVector> = Vec::with_capacity(containers.len());
        let mut slots = vec![0usize; sizes.len()];
        'combination: for linear in 0..combinations {
            qs.clear();
            let mut rem = linear;
            for (slot, &n) in slots.iter_mut().zip(&sizes).rev() {
                *slot = rem % n;
                rem /= n;
            }
            for ((c, &slot), tag) in containers.iter().zip(&slots).zip(&self.weights) {
                let q = &c[slot];
                if *tag == WeightTag::Observable && (!q.is_good_quality() || q.sum_weights() == 0.0) {
                    continue 'combination;
                }
                qs.push(q);
            }
            let value = (self.combiner)(&qs);
            if !value.is_finite() {
                self.dropped += 1;
                continue;
            }
            if let Some(stat) = result.get_mut(linear * n_event_bins + event_bin) {
                stat.fill(value, weights);
            }
        }
        Ok(())
    }
}

/// Finalized correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Correlation name.
    pub name: String,
    /// Nominal statistic per bin.
    pub nominal: BinnedContainer<Statistic>,
    /// Nominal plus realizations per bin.
    pub binned: BinnedContainer<ResampledStatistic>,
}

impl CorrelationResult {
    pub(crate) fn from_binned(name: &str, binned: BinnedContainer<ResampledStatistic>) -> Self {
        Self { name: name.to_string(), nominal: binned.map(|r| *r.nominal()), binned }
    }

    /// Mean and resampling error of every bin, in linear order.
    pub fn values(&self) -> Vec<(f64, f64)> {
        self.binned.iter().map(|r| (r.mean(), r.error())).collect()
    }

    /// Merge a result accumulated on a disjoint event sample.
    pub fn merge(&mut self, other: &CorrelationResult) -> Result<()> {
        self.binned.check_same_axes(&other.binned)?;
        for (a, b) in self.binned.iter_mut().zip(other.binned.iter()) {
            a.merge(b)?;
        }
        self.nominal = self.binned.map(|r| *r.nominal());
        Ok(())
    }
}
