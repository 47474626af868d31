//! Alignment: rotate Qn onto the phase of a reference sub-event.

use qn_core::{Axis, Error, QVector, Result};

use super::{Calibration, CorrectionStep, QnEvent, StepContext, StepStage, StepStatus};
use crate::profile::CalibrationProfile;

/// Step key.
pub const ALIGNMENT: &str = "alignment";

const XAXB: usize = 0;
const YAYB: usize = 1;
const XAYB: usize = 2;
const YAXB: usize = 3;

/// Rotation by the calibrated phase offset to a reference configuration.
#[derive(Debug)]
pub struct Alignment {
    reference: String,
    reference_index: Option<usize>,
    harmonic: u8,
    calibration: Calibration,
    pending: Option<(QVector, Option<QVector>)>,
    applied: bool,
}

impl Alignment {
    /// Align configuration `owner` on `reference` using harmonic `harmonic`.
    pub fn new(
        owner: &str,
        event_axes: &[Axis],
        harmonics: &[u8],
        reference: &str,
        harmonic: u8,
        min_entries: u64,
    ) -> Result<Self> {
        if !harmonics.contains(&harmonic) {
            return Err(Error::Validation(format!(
                "{owner}: alignment harmonic {harmonic} is not active"
            )));
        }
        if reference == owner {
            return Err(Error::Validation(format!("{owner}: cannot align on itself")));
        }
        let profile = CalibrationProfile::new("correlations", event_axes, 4)?;
        let n_bins = profile.n_event_bins();
        Ok(Self {
            reference: reference.to_string(),
            reference_index: None,
            harmonic,
            calibration: Calibration::new(owner, ALIGNMENT, vec![profile], n_bins, min_entries),
            pending: None,
            applied: false,
        })
    }

    /// Calibrated phase offset for `bin`, `None` while undefined.
    pub fn offset(&self, bin: usize) -> Option<f64> {
        let p = self.calibration.profile(0);
        let num = p.mean(bin, YAXB) - p.mean(bin, XAYB);
        let den = p.mean(bin, XAXB) + p.mean(bin, YAYB);
        if num == 0.0 && den == 0.0 {
            return None;
        }
        let delta = num.atan2(den) / f64::from(self.harmonic);
        delta.is_finite().then_some(delta)
    }
}

impl CorrectionStep for Alignment {
    fn name(&self) -> &'static str {
        ALIGNMENT
    }

    fn stage(&self) -> StepStage {
        StepStage::QnVector
    }

    fn priority(&self) -> u8 {
        1
    }

    fn resolve_peers(&mut self, lookup: &dyn Fn(&str) -> Option<usize>) -> Result<()> {
        self.reference_index = Some(lookup(&self.reference).ok_or_else(|| {
            Error::Validation(format!("alignment reference '{}' is not configured", self.reference))
        })?);
        Ok(())
    }

    fn process_corrections(
        &mut self,
        ctx: &StepContext<'_>,
        event: &mut QnEvent,
    ) -> Result<StepStatus> {
        let input = event.corrected.clone();
        let peer = self.reference_index.and_then(|i| ctx.peers.get(i)).cloned();
        self.applied = self.calibration.is_ready(ctx.class_bin);
        if self.applied
            && input.is_good_quality()
            && let Some(delta) = self.offset(ctx.class_bin)
        {
            for h in input.harmonics() {
                event.corrected.set_q(h, input.q(h).rotated(-f64::from(h) * delta));
            }
        }
        self.pending = Some((input, peer));
        Ok(if self.applied { StepStatus::Applied } else { StepStatus::NotCalibrated })
    }

    fn process_data_collection(
        &mut self,
        ctx: &StepContext<'_>,
        _event: &QnEvent,
    ) -> Result<StepStatus> {
        let Some((a, b)) = self.pending.as_ref() else {
            return Ok(StepStatus::NotCalibrated);
        };
        if let Some(b) = b
            && a.is_good_quality()
            && b.is_good_quality()
        {
            let (qa, qb) = (a.q(self.harmonic), b.q(self.harmonic));
            let profile = self.calibration.profile_mut(0);
            profile.fill(ctx.class_bin, XAXB, qa.x * qb.x);
            profile.fill(ctx.class_bin, YAYB, qa.y * qb.y);
            profile.fill(ctx.class_bin, XAYB, qa.x * qb.y);
            profile.fill(ctx.class_bin, YAXB, qa.y * qb.x);
            self.calibration.record(ctx.class_bin);
        }
        Ok(if self.applied { StepStatus::Applied } else { StepStatus::NotCalibrated })
    }

    fn clear_correction_step(&mut self) {
        self.pending = None;
        self.applied = false;
    }

    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn calibration_mut(&mut self) -> &mut Calibration {
        &mut self.calibration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{cent_axes, ctx, event_with};
    use approx::assert_relative_eq;
    use qn_core::QVec;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn rotates_onto_reference_phase() {
        let mut step = Alignment::new("AA", &cent_axes(), &[1, 2], "BB", 1, 3).unwrap();
        step.resolve_peers(&|name| (name == "BB").then_some(0)).unwrap();

        // A lags B by pi/4 in every event.
        let reference = event_with(&[1, 2], &[(1.0, 0.0), (1.0, 0.0)], 1.0).corrected;
        let a = QVec::new(FRAC_PI_4.cos(), FRAC_PI_4.sin());
        let peers = [reference];
        for _ in 0..3 {
            let mut e = event_with(&[1, 2], &[(a.x, a.y), (0.0, 1.0)], 1.0);
            step.clear_correction_step();
            let status = step.process_corrections(&ctx(0, &peers), &mut e).unwrap();
            assert_eq!(status, StepStatus::NotCalibrated);
            step.process_data_collection(&ctx(0, &peers), &e).unwrap();
        }
        assert_relative_eq!(step.offset(0).unwrap(), FRAC_PI_4, epsilon = 1e-12);

        let mut e = event_with(&[1, 2], &[(a.x, a.y), (0.0, 1.0)], 1.0);
        step.clear_correction_step();
        let status = step.process_corrections(&ctx(0, &peers), &mut e).unwrap();
        assert_eq!(status, StepStatus::Applied);
        assert_relative_eq!(e.corrected.x(1), 1.0, epsilon = 1e-12);
        assert_relative_eq!(e.corrected.y(1), 0.0, epsilon = 1e-12);
        // Harmonic 2 is rotated by -2 delta = -pi/2.
        assert_relative_eq!(e.corrected.x(2), 1.0, epsilon = 1e-12);
        assert_relative_eq!(e.corrected.y(2), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unknown_reference_rejected() {
        let mut step = Alignment::new("AA", &cent_axes(), &[1], "ZZ", 1, 3).unwrap();
        assert!(step.resolve_peers(&|_| None).is_err());
        assert!(Alignment::new("AA", &cent_axes(), &[1], "BB", 2, 3).is_err());
        assert!(Alignment::new("AA", &cent_axes(), &[1], "AA", 1, 3).is_err());
    }
}
