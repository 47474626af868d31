//! Recentering: subtract the calibrated mean Qn of the event class.

use qn_core::{Axis, QVec, QVector, Result};

use super::{
    Calibration, CorrectionStep, MIN_DENOMINATOR, QnEvent, StepContext, StepStage, StepStatus,
    xy_profile,
};

/// Step key.
pub const RECENTERING: &str = "recentering";

/// Mean (and optionally width) correction per harmonic.
#[derive(Debug)]
pub struct Recentering {
    harmonics: Vec<u8>,
    width_equalization: bool,
    calibration: Calibration,
    input: Option<QVector>,
    applied: bool,
}

impl Recentering {
    /// Recentering for configuration `owner` with the given harmonics.
    pub fn new(
        owner: &str,
        event_axes: &[Axis],
        harmonics: &[u8],
        min_entries: u64,
        width_equalization: bool,
    ) -> Result<Self> {
        let profile = xy_profile("mean_qn", event_axes, harmonics)?;
        let n_bins = profile.n_event_bins();
        Ok(Self {
            harmonics: harmonics.to_vec(),
            width_equalization,
            calibration: Calibration::new(owner, RECENTERING, vec![profile], n_bins, min_entries),
            input: None,
            applied: false,
        })
    }

    fn corrected(&self, bin: usize, k: usize, q: QVec) -> QVec {
        let p = self.calibration.profile(0);
        let (sx, sy) = (p.get(bin, 2 * k), p.get(bin, 2 * k + 1));
        let mut out = q - QVec::new(sx.mean(), sy.mean());
        if self.width_equalization {
            let (wx, wy) = (sx.std_dev(), sy.std_dev());
            if wx > MIN_DENOMINATOR && wy > MIN_DENOMINATOR {
                out = QVec::new(out.x / wx, out.y / wy);
            }
        }
        out
    }
}

impl CorrectionStep for Recentering {
    fn name(&self) -> &'static str {
        RECENTERING
    }

    fn stage(&self) -> StepStage {
        StepStage::QnVector
    }

    fn process_corrections(
        &mut self,
        ctx: &StepContext<'_>,
        event: &mut QnEvent,
    ) -> Result<StepStatus> {
        let input = event.corrected.clone();
        self.applied = self.calibration.is_ready(ctx.class_bin);
        if self.applied && input.is_good_quality() {
            for (k, &h) in self.harmonics.iter().enumerate() {
                let q = self.corrected(ctx.class_bin, k, input.q(h));
                event.corrected.set_q(h, q);
            }
        }
        self.input = Some(input);
        Ok(if self.applied { StepStatus::Applied } else { StepStatus::NotCalibrated })
    }

    fn process_data_collection(
        &mut self,
        ctx: &StepContext<'_>,
        _event: &QnEvent,
    ) -> Result<StepStatus> {
        let Some(input) = self.input.as_ref() else {
            return Ok(StepStatus::NotCalibrated);
        };
        if input.is_good_quality() {
            let profile = self.calibration.profile_mut(0);
            for (k, &h) in self.harmonics.iter().enumerate() {
                let q = input.q(h);
                profile.fill(ctx.class_bin, 2 * k, q.x);
                profile.fill(ctx.class_bin, 2 * k + 1, q.y);
            }
            self.calibration.record(ctx.class_bin);
        }
        Ok(if self.applied { StepStatus::Applied } else { StepStatus::NotCalibrated })
    }

    fn clear_correction_step(&mut self) {
        self.input = None;
        self.applied = false;
    }

    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn calibration_mut(&mut self) -> &mut Calibration {
        &mut self.calibration
    }
}
