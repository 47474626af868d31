//! Serde configuration of a correction run.
//!
//! A [`CorrectionConfig`] is plain data; [`crate::CorrectionCalculator::from_config`]
//! validates it against a [`VariableSchema`] and builds the detectors.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use qn_core::{Axis, CutConfig, Error, Normalization, Result, Variable, VariableSchema};
use serde::{Deserialize, Serialize};

use crate::detector::{ChannelScheme, DetectorKind};
use crate::steps::{
    Alignment, CorrectionStep, EqualizationMethod, GainEqualization, Recentering, TwistAndRescale,
    TwistRescaleMethod,
};

fn default_min_entries() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Axis given either by explicit edges or by a uniform range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Axis name.
    pub name: String,
    /// Explicit ascending edges.
    #[serde(default)]
    pub edges: Option<Vec<f64>>,
    /// Number of uniform bins.
    #[serde(default)]
    pub n_bins: Option<usize>,
    /// Lower edge of a uniform axis.
    #[serde(default)]
    pub low: Option<f64>,
    /// Upper edge of a uniform axis.
    #[serde(default)]
    pub high: Option<f64>,
}

impl AxisConfig {
    /// Build the axis.
    pub fn build(&self) -> Result<Axis> {
        match (&self.edges, self.n_bins, self.low, self.high) {
            (Some(edges), None, None, None) => Axis::from_edges(self.name.clone(), edges.clone()),
            (None, Some(n), Some(low), Some(high)) => Axis::uniform(self.name.clone(), n, low, high),
            _ => Err(Error::Validation(format!(
                "axis '{}': give either `edges` or `n_bins`, `low` and `high`",
                self.name
            ))),
        }
    }
}

/// A variable binned along an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinningConfig {
    /// Variable name in the schema.
    pub variable: String,
    /// Binning.
    pub axis: AxisConfig,
}

impl BinningConfig {
    /// Resolve the variable and build the axis.
    pub fn build(&self, schema: &VariableSchema) -> Result<(Variable, Axis)> {
        Ok((schema.get(&self.variable)?, self.axis.build()?))
    }
}

/// One correction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Mean subtraction, optionally width equalization.
    Recentering {
        /// Entries per event-class bin before corrections apply.
        #[serde(default = "default_min_entries")]
        min_entries: u64,
        /// Divide by the component width.
        #[serde(default)]
        width_equalization: bool,
    },
    /// Rotation onto a reference configuration.
    Alignment {
        /// Reference configuration name.
        reference: String,
        /// Harmonic used to measure the offset.
        harmonic: u8,
        /// Entries per event-class bin before corrections apply.
        #[serde(default = "default_min_entries")]
        min_entries: u64,
    },
    /// Twist and rescale.
    TwistAndRescale {
        /// Parameter source.
        #[serde(default)]
        method: TwistRescaleMethod,
        /// Apply the twist part.
        #[serde(default = "default_true")]
        apply_twist: bool,
        /// Apply the rescale part.
        #[serde(default = "default_true")]
        apply_rescale: bool,
        /// Twist reference configuration (correlations method).
        #[serde(default)]
        b_detector: Option<String>,
        /// Rescale reference configuration (correlations method).
        #[serde(default)]
        c_detector: Option<String>,
        /// Entries per event-class bin before corrections apply.
        #[serde(default = "default_min_entries")]
        min_entries: u64,
    },
    /// Channel gain equalization (channelized detectors only).
    GainEqualization {
        /// Equalization formula.
        #[serde(default)]
        method: EqualizationMethod,
        /// Use the channel-group mean as target.
        #[serde(default)]
        use_channel_groups_weights: bool,
        /// Entries per event-class bin before corrections apply.
        #[serde(default = "default_min_entries")]
        min_entries: u64,
    },
}

impl StepConfig {
    /// Build the step for configuration `owner`.
    pub fn build(
        &self,
        owner: &str,
        event_axes: &[Axis],
        harmonics: &[u8],
        scheme: Option<&ChannelScheme>,
    ) -> Result<Box<dyn CorrectionStep>> {
        Ok(match self {
            StepConfig::Recentering { min_entries, width_equalization } => Box::new(
                Recentering::new(owner, event_axes, harmonics, *min_entries, *width_equalization)?,
            ),
            StepConfig::Alignment { reference, harmonic, min_entries } => Box::new(Alignment::new(
                owner,
                event_axes,
                harmonics,
                reference,
                *harmonic,
                *min_entries,
            )?),
            StepConfig::TwistAndRescale {
                method,
                apply_twist,
                apply_rescale,
                b_detector,
                c_detector,
                min_entries,
            } => {
                let step = match method {
                    TwistRescaleMethod::DoubleHarmonic => {
                        TwistAndRescale::double_harmonic(owner, event_axes, harmonics, *min_entries)?
                    }
                    TwistRescaleMethod::Correlations => TwistAndRescale::correlations(
                        owner,
                        event_axes,
                        harmonics,
                        b_detector.as_deref(),
                        c_detector.as_deref(),
                        *min_entries,
                    )?,
                };
                Box::new(step.with_parts(*apply_twist, *apply_rescale))
            }
            StepConfig::GainEqualization { method, use_channel_groups_weights, min_entries } => {
                let scheme = scheme.ok_or_else(|| {
                    Error::Validation(format!(
                        "{owner}: gain equalization needs a channelized detector"
                    ))
                })?;
                Box::new(GainEqualization::new(
                    owner,
                    event_axes,
                    scheme,
                    *method,
                    *use_channel_groups_weights,
                    *min_entries,
                )?)
            }
        })
    }
}

/// One detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detector name; configurations are named after it.
    pub name: String,
    /// Read-out type.
    pub kind: DetectorKind,
    /// Azimuthal angle variable (one element per track slot or channel).
    pub phi: String,
    /// Weight variable (unit weights when absent).
    #[serde(default)]
    pub weight: Option<String>,
    /// Per-element binning, one configuration per bin.
    #[serde(default)]
    pub binning: Vec<BinningConfig>,
    /// Active harmonics, 1..=8.
    pub harmonics: Vec<u8>,
    /// Normalization of the built Qn vectors.
    #[serde(default)]
    pub normalization: Normalization,
    /// Correction chain.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Channel scheme (channelized only; all channels used when absent).
    #[serde(default)]
    pub channels: Option<ChannelScheme>,
    /// Data-vector cuts.
    #[serde(default)]
    pub cuts: Vec<CutConfig>,
}

/// A full correction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Event-class binning.
    #[serde(default)]
    pub event_classes: Vec<BinningConfig>,
    /// Detectors.
    #[serde(default)]
    pub detectors: Vec<DetectorConfig>,
    /// Event selection.
    #[serde(default)]
    pub event_cuts: Vec<CutConfig>,
}

impl CorrectionConfig {
    /// Parse from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_forms() {
        let uniform: AxisConfig =
            serde_json::from_str(r#"{"name":"Centrality","n_bins":10,"low":0,"high":100}"#).unwrap();
        assert_eq!(uniform.build().unwrap().len(), 10);
        let edges: AxisConfig = serde_json::from_str(r#"{"name":"Pt","edges":[0.2,1,3]}"#).unwrap();
        assert_eq!(edges.build().unwrap().len(), 2);
        let neither: AxisConfig = serde_json::from_str(r#"{"name":"Pt"}"#).unwrap();
        assert!(neither.build().is_err());
    }

    #[test]
    fn steps_parse_with_defaults() {
        let steps: Vec<StepConfig> = serde_json::from_str(
            r#"[
                {"type":"recentering"},
                {"type":"alignment","reference":"BB","harmonic":2,"min_entries":5},
                {"type":"twist_and_rescale","method":"correlations","b_detector":"BB","c_detector":"CC"},
                {"type":"gain_equalization","method":{"type":"width","scale":0.2}}
            ]"#,
        )
        .unwrap();
        assert_eq!(steps[0], StepConfig::Recentering { min_entries: 10, width_equalization: false });
        match &steps[2] {
            StepConfig::TwistAndRescale { method, apply_twist, c_detector, .. } => {
                assert_eq!(*method, TwistRescaleMethod::Correlations);
                assert!(apply_twist);
                assert_eq!(c_detector.as_deref(), Some("CC"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &steps[3] {
            StepConfig::GainEqualization { method, .. } => {
                assert_eq!(*method, EqualizationMethod::Width { shift: 1.0, scale: 0.2 });
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gain_equalization_needs_channels() {
        let step = StepConfig::GainEqualization {
            method: EqualizationMethod::Average,
            use_channel_groups_weights: false,
            min_entries: 1,
        };
        assert!(step.build("TPC", &[], &[1], None).is_err());
        let scheme = ChannelScheme::all_used(4);
        let built = step.build("V0", &[], &[1], Some(&scheme)).unwrap();
        assert_eq!(built.name(), "gain_equalization");
    }

    #[test]
    fn full_config_parses() {
        let config = CorrectionConfig::from_json_str(
            r#"{
                "event_classes": [{"variable":"Centrality","axis":{"name":"Centrality","n_bins":10,"low":0,"high":100}}],
                "event_cuts": [{"variable":"VtxZ","type":"within","min":-10,"max":10}],
                "detectors": [{
                    "name":"V0A","kind":"channelized","phi":"V0APhi","weight":"V0AMult",
                    "harmonics":[1,2],"normalization":"m",
                    "channels":{"used":[true,true,false,true],"groups":[0,0,1,1]},
                    "steps":[{"type":"gain_equalization","use_channel_groups_weights":true},{"type":"recentering"}]
                }]
            }"#,
        )
        .unwrap();
        let d = &config.detectors[0];
        assert_eq!(d.kind, DetectorKind::Channelized);
        assert_eq!(d.normalization, Normalization::M);
        assert_eq!(d.channels.as_ref().unwrap().n_groups(), 2);
        assert_eq!(d.steps.len(), 2);
        assert!(CorrectionConfig::from_json_str("{\"detectors\": 3}").is_err());
    }
}
