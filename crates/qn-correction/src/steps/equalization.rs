//! Gain equalization of channelized input data.

use qn_core::{Axis, Error, Result, Statistic};
use serde::{Deserialize, Serialize};

use super::{Calibration, CorrectionStep, MIN_DENOMINATOR, QnEvent, StepContext, StepStage, StepStatus};
use crate::detector::ChannelScheme;
use crate::profile::CalibrationProfile;

/// Step key.
pub const GAIN_EQUALIZATION: &str = "gain_equalization";

/// Equalization formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EqualizationMethod {
    /// `w · target / <w_ch>`.
    #[default]
    Average,
    /// `shift + scale · (w - <w_ch>) / σ_ch`.
    Width {
        /// Offset of the equalized weight.
        #[serde(default = "default_shift")]
        shift: f64,
        /// Scale of the equalized weight.
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

fn default_shift() -> f64 {
    1.0
}

fn default_scale() -> f64 {
    0.1
}

/// Per-channel multiplicity equalization.
#[derive(Debug)]
pub struct GainEqualization {
    method: EqualizationMethod,
    channel_map: Vec<Option<usize>>,
    group_map: Option<Vec<Option<usize>>>,
    calibration: Calibration,
    applied: bool,
}

impl GainEqualization {
    /// Equalization over the used channels of `scheme`.
    ///
    /// With `use_groups`, the target of a channel is the mean of its group.
    pub fn new(
        owner: &str,
        event_axes: &[Axis],
        scheme: &ChannelScheme,
        method: EqualizationMethod,
        use_groups: bool,
        min_entries: u64,
    ) -> Result<Self> {
        scheme.validate()?;
        let mut next = 0;
        let channel_map: Vec<Option<usize>> = (0..scheme.n_channels())
            .map(|ch| {
                scheme.is_used(ch).then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        if next == 0 {
            return Err(Error::Validation(format!("{owner}: no used channels to equalize")));
        }
        let mut profiles = vec![CalibrationProfile::new("channel_multiplicity", event_axes, next)?];
        let group_map = if use_groups {
            if scheme.n_groups() == 0 {
                return Err(Error::Validation(format!(
                    "{owner}: group weights requested but no channel groups defined"
                )));
            }
            profiles.push(CalibrationProfile::new(
                "group_multiplicity",
                event_axes,
                scheme.n_groups(),
            )?);
            Some((0..scheme.n_channels()).map(|ch| scheme.group(ch)).collect())
        } else {
            None
        };
        let n_bins = profiles[0].n_event_bins();
        Ok(Self {
            method,
            channel_map,
            group_map,
            calibration: Calibration::new(owner, GAIN_EQUALIZATION, profiles, n_bins, min_entries),
            applied: false,
        })
    }

    fn equalized(&self, bin: usize, channel: usize, weight: f64) -> f64 {
        let Some(Some(component)) = self.channel_map.get(channel).copied() else {
            return weight;
        };
        let stat: Statistic = self.calibration.profile(0).get(bin, component);
        let mean = stat.mean();
        if !mean.is_finite() || mean.abs() < MIN_DENOMINATOR {
            return 0.0;
        }
        match self.method {
            EqualizationMethod::Average => {
                let target = match &self.group_map {
                    Some(groups) => match groups.get(channel).copied().flatten() {
                        Some(g) => self.calibration.profile(1).mean(bin, g),
                        None => 1.0,
                    },
                    None => 1.0,
                };
                weight * target / mean
            }
            EqualizationMethod::Width { shift, scale } => {
                let sigma = stat.std_dev();
                if sigma < MIN_DENOMINATOR {
                    0.0
                } else {
                    shift + scale * (weight - mean) / sigma
                }
            }
        }
    }
}

impl CorrectionStep for GainEqualization {
    fn name(&self) -> &'static str {
        GAIN_EQUALIZATION
    }

    fn stage(&self) -> StepStage {
        StepStage::InputData
    }

    fn process_corrections(
        &mut self,
        ctx: &StepContext<'_>,
        event: &mut QnEvent,
    ) -> Result<StepStatus> {
        self.applied = self.calibration.is_ready(ctx.class_bin);
        if !self.applied {
            return Ok(StepStatus::NotCalibrated);
        }
        for dv in &mut event.data {
            dv.equalized_weight = self.equalized(ctx.class_bin, dv.channel, dv.weight);
        }
        Ok(StepStatus::Applied)
    }

    fn process_data_collection(
        &mut self,
        ctx: &StepContext<'_>,
        event: &QnEvent,
    ) -> Result<StepStatus> {
        if !event.data.is_empty() {
            let bin = ctx.class_bin;
            for dv in &event.data {
                let Some(Some(component)) = self.channel_map.get(dv.channel).copied() else {
                    continue;
                };
                self.calibration.profile_mut(0).fill(bin, component, dv.weight);
                if let Some(Some(g)) = self.group_map.as_ref().and_then(|m| m.get(dv.channel)).copied()
                {
                    self.calibration.profile_mut(1).fill(bin, g, dv.weight);
                }
            }
            self.calibration.record(bin);
        }
        Ok(if self.applied { StepStatus::Applied } else { StepStatus::NotCalibrated })
    }

    fn clear_correction_step(&mut self) {
        self.applied = false;
    }

    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn calibration_mut(&mut self) -> &mut Calibration {
        &mut self.calibration
    }
}
