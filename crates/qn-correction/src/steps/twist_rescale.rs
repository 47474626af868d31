//! Twist and rescale: remove the x/y cross-correlation and equalize the
//! component widths.
//!
//! The double-harmonic method derives the parameters from the detector's own
//! `<cos 2nφ>`, `<sin 2nφ>`. The correlations method derives them from
//! correlations with sub-detectors B (twist) and C (rescale).

use qn_core::{Axis, QVec, QVector, Result};
use serde::{Deserialize, Serialize};

use super::{
    Calibration, CorrectionStep, MIN_DENOMINATOR, QnEvent, StepContext, StepStage, StepStatus,
    xy_profile,
};
use crate::profile::CalibrationProfile;

/// Step key.
pub const TWIST_AND_RESCALE: &str = "twist_and_rescale";

/// Source of the twist and rescale parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwistRescaleMethod {
    /// Own double-harmonic averages.
    #[default]
    DoubleHarmonic,
    /// Correlations with sub-detectors B and C.
    Correlations,
}

// Component layout of the correlations profile, per harmonic.
const XAXB: usize = 0;
const YAYB: usize = 1;
const XAYB: usize = 2;
const YAXB: usize = 3;
const XAXC: usize = 4;
const YAYC: usize = 5;
const XBXC: usize = 6;
const YBYC: usize = 7;
const N_CORRELATIONS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Parameters {
    lambda_plus: f64,
    lambda_minus: f64,
    rescale: Option<(f64, f64)>,
}

#[derive(Debug)]
struct Pending {
    input: QVector,
    double_harmonic: QVector,
    b: Option<QVector>,
    c: Option<QVector>,
}

/// Twist-and-rescale correction.
#[derive(Debug)]
pub struct TwistAndRescale {
    owner: String,
    harmonics: Vec<u8>,
    method: TwistRescaleMethod,
    apply_twist: bool,
    apply_rescale: bool,
    b_detector: Option<String>,
    c_detector: Option<String>,
    b_index: Option<usize>,
    c_index: Option<usize>,
    calibration: Calibration,
    pending: Option<Pending>,
    applied: bool,
}

impl TwistAndRescale {
    /// Double-harmonic variant.
    pub fn double_harmonic(
        owner: &str,
        event_axes: &[Axis],
        harmonics: &[u8],
        min_entries: u64,
    ) -> Result<Self> {
        let profile = xy_profile("double_harmonic", event_axes, harmonics)?;
        Ok(Self::with_profile(owner, harmonics, TwistRescaleMethod::DoubleHarmonic, profile, min_entries))
    }

    /// Correlations variant using sub-detectors `b` (twist) and `c` (rescale).
    pub fn correlations(
        owner: &str,
        event_axes: &[Axis],
        harmonics: &[u8],
        b: Option<&str>,
        c: Option<&str>,
        min_entries: u64,
    ) -> Result<Self> {
        let profile =
            CalibrationProfile::new("correlations", event_axes, N_CORRELATIONS * harmonics.len())?;
        let mut step =
            Self::with_profile(owner, harmonics, TwistRescaleMethod::Correlations, profile, min_entries);
        step.b_detector = b.map(str::to_string);
        step.c_detector = c.map(str::to_string);
        Ok(step)
    }

    fn with_profile(
        owner: &str,
        harmonics: &[u8],
        method: TwistRescaleMethod,
        profile: CalibrationProfile,
        min_entries: u64,
    ) -> Self {
        let n_bins = profile.n_event_bins();
        Self {
            owner: owner.to_string(),
            harmonics: harmonics.to_vec(),
            method,
            apply_twist: true,
            apply_rescale: true,
            b_detector: None,
            c_detector: None,
            b_index: None,
            c_index: None,
            calibration: Calibration::new(owner, TWIST_AND_RESCALE, vec![profile], n_bins, min_entries),
            pending: None,
            applied: false,
        }
    }

    /// Enable or disable the two parts.
    pub fn with_parts(mut self, twist: bool, rescale: bool) -> Self {
        self.apply_twist = twist;
        self.apply_rescale = rescale;
        self
    }

    fn parameters(&self, bin: usize, k: usize) -> Parameters {
        let p = self.calibration.profile(0);
        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                let x2 = p.mean(bin, 2 * k);
                let y2 = p.mean(bin, 2 * k + 1);
                Parameters {
                    lambda_plus: y2 / (1.0 + x2),
                    lambda_minus: y2 / (1.0 - x2),
                    rescale: Some((1.0 + x2, 1.0 - x2)),
                }
            }
            TwistRescaleMethod::Correlations => {
                let m = |c: usize| p.mean(bin, N_CORRELATIONS * k + c);
                let rescale = self.c_index.map(|_| {
                    let a_plus = (2.0 * m(XAXB) * m(XAXC) / m(XBXC)).sqrt();
                    let a_minus = (2.0 * m(YAYB) * m(YAYC) / m(YBYC)).sqrt();
                    (a_plus, a_minus)
                });
                Parameters {
                    lambda_plus: m(YAXB) / m(XAXB),
                    lambda_minus: m(XAYB) / m(YAYB),
                    rescale,
                }
            }
        }
    }

    fn correct(&self, q: QVec, par: Parameters) -> QVec {
        let mut out = q;
        if self.apply_twist {
            let (lp, lm) = (par.lambda_plus, par.lambda_minus);
            let den = 1.0 - lm * lp;
            if lp.is_finite() && lm.is_finite() && den.abs() > MIN_DENOMINATOR {
                out = QVec::new((out.x - lm * out.y) / den, (out.y - lp * out.x) / den);
            }
        }
        if self.apply_rescale
            && let Some((a_plus, a_minus)) = par.rescale
            && a_plus.is_finite()
            && a_minus.is_finite()
            && a_plus > MIN_DENOMINATOR
            && a_minus > MIN_DENOMINATOR
        {
            out = QVec::new(out.x / a_plus, out.y / a_minus);
        }
        out
    }
}

impl CorrectionStep for TwistAndRescale {
    fn name(&self) -> &'static str {
        TWIST_AND_RESCALE
    }

    fn stage(&self) -> StepStage {
        StepStage::QnVector
    }

    fn priority(&self) -> u8 {
        2
    }

    fn resolve_peers(&mut self, lookup: &dyn Fn(&str) -> Option<usize>) -> Result<()> {
        if self.method != TwistRescaleMethod::Correlations {
            return Ok(());
        }
        self.b_index = self.b_detector.as_deref().and_then(lookup);
        self.c_index = self.c_detector.as_deref().and_then(lookup);
        if self.b_index.is_none() {
            log::warn!(
                "{}: twist-and-rescale sub-detector B {:?} not configured; step skipped",
                self.owner,
                self.b_detector
            );
        } else if self.c_index.is_none() {
            log::warn!(
                "{}: twist-and-rescale sub-detector C {:?} not configured; applying twist only",
                self.owner,
                self.c_detector
            );
        }
        Ok(())
    }

    fn process_corrections(
        &mut self,
        ctx: &StepContext<'_>,
        event: &mut QnEvent,
    ) -> Result<StepStatus> {
        if self.method == TwistRescaleMethod::Correlations && self.b_index.is_none() {
            self.pending = None;
            return Ok(StepStatus::Skipped);
        }
        let input = event.corrected.clone();
        self.applied = self.calibration.is_ready(ctx.class_bin);
        if self.applied && input.is_good_quality() {
            for (k, &h) in self.harmonics.iter().enumerate() {
                let par = self.parameters(ctx.class_bin, k);
                event.corrected.set_q(h, self.correct(input.q(h), par));
            }
        }
        let peer = |i: Option<usize>| i.and_then(|i| ctx.peers.get(i)).cloned();
        self.pending = Some(Pending {
            input,
            double_harmonic: event.plain_2n.clone(),
            b: peer(self.b_index),
            c: peer(self.c_index),
        });
        Ok(if self.applied { StepStatus::Applied } else { StepStatus::NotCalibrated })
    }

    fn process_data_collection(
        &mut self,
        ctx: &StepContext<'_>,
        _event: &QnEvent,
    ) -> Result<StepStatus> {
        let Some(pending) = self.pending.as_ref() else {
            return Ok(if self.method == TwistRescaleMethod::Correlations && self.b_index.is_none() {
                StepStatus::Skipped
            } else {
                StepStatus::NotCalibrated
            });
        };
        let bin = ctx.class_bin;
        let profile = self.calibration.profile_mut(0);
        let mut collected = false;
        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                if pending.double_harmonic.is_good_quality() {
                    for (k, &h) in self.harmonics.iter().enumerate() {
                        let q2 = pending.double_harmonic.q(h);
                        profile.fill(bin, 2 * k, q2.x);
                        profile.fill(bin, 2 * k + 1, q2.y);
                    }
                    collected = true;
                }
            }
            TwistRescaleMethod::Correlations => {
                let good = |q: &Option<QVector>| q.as_ref().filter(|q| q.is_good_quality()).cloned();
                if let (true, Some(b)) = (pending.input.is_good_quality(), good(&pending.b)) {
                    let c = good(&pending.c);
                    for (k, &h) in self.harmonics.iter().enumerate() {
                        let (qa, qb) = (pending.input.q(h), b.q(h));
                        let base = N_CORRELATIONS * k;
                        profile.fill(bin, base + XAXB, qa.x * qb.x);
                        profile.fill(bin, base + YAYB, qa.y * qb.y);
                        profile.fill(bin, base + XAYB, qa.x * qb.y);
                        profile.fill(bin, base + YAXB, qa.y * qb.x);
                        if let Some(c) = &c {
                            let qc = c.q(h);
                            profile.fill(bin, base + XAXC, qa.x * qc.x);
                            profile.fill(bin, base + YAYC, qa.y * qc.y);
                            profile.fill(bin, base + XBXC, qb.x * qc.x);
                            profile.fill(bin, base + YBYC, qb.y * qc.y);
                        }
                    }
                    collected = true;
                }
            }
        }
        if collected {
            self.calibration.record(bin);
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
