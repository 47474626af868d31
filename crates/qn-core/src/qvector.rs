//! Flow vectors (Qn vectors).
//!
//! A [`QVector`] holds up to [`MAX_HARMONICS`] harmonic components, each a 2D
//! vector `Q_n = Σ w·(cos nφ, sin nφ)`, together with the event multiplicity,
//! the sum of weights and a normalization tag.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest supported harmonic.
pub const MAX_HARMONICS: usize = 8;

/// Sum of weights below which a vector is flagged as bad quality.
pub const MIN_SUM_OF_WEIGHTS: f64 = 1e-6;

/// A single 2D harmonic component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QVec {
    /// Cosine component.
    pub x: f64,
    /// Sine component.
    pub y: f64,
}

impl QVec {
    /// Construct from components.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean magnitude.
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Azimuth `atan2(y, x)`.
    pub fn phi(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Both components finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Replace a non-finite component pair by zero.
    pub fn sanitized(self) -> Self {
        if self.is_finite() { self } else { Self::default() }
    }

    /// Rotate by `angle` radians.
    pub fn rotated(self, angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self { x: self.x * c - self.y * s, y: self.x * s + self.y * c }
    }
}

impl std::ops::Add for QVec {
    type Output = QVec;
    fn add(self, rhs: QVec) -> QVec {
        QVec::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for QVec {
    type Output = QVec;
    fn sub(self, rhs: QVec) -> QVec {
        QVec::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f64> for QVec {
    type Output = QVec;
    fn mul(self, rhs: f64) -> QVec {
        QVec::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f64> for QVec {
    type Output = QVec;
    fn div(self, rhs: f64) -> QVec {
        QVec::new(self.x / rhs, self.y / rhs)
    }
}

/// How a flow vector is normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Raw sums.
    #[default]
    None,
    /// Divided by the sum of weights.
    M,
    /// Divided by the square root of the sum of weights.
    SqrtM,
    /// Each harmonic divided by its own magnitude.
    Magnitude,
}

/// Per-harmonic flow vector with normalization state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QVector {
    harmonics: u16,
    q: [QVec; MAX_HARMONICS],
    magnitudes: [f64; MAX_HARMONICS],
    n: u32,
    sum_weights: f64,
    good_quality: bool,
    normalization: Normalization,
}

impl Default for QVector {
    fn default() -> Self {
        Self {
            harmonics: 0,
            q: [QVec::default(); MAX_HARMONICS],
            magnitudes: [0.0; MAX_HARMONICS],
            n: 0,
            sum_weights: 0.0,
            good_quality: false,
            normalization: Normalization::None,
        }
    }
}

fn check_harmonic(h: u8) -> Result<()> {
    if h == 0 || h as usize > MAX_HARMONICS {
        return Err(Error::Validation(format!(
            "harmonic {h} outside supported range 1..={MAX_HARMONICS}"
        )));
    }
    Ok(())
}

impl QVector {
    /// Empty raw vector with the given active harmonics.
    pub fn new(harmonics: &[u8]) -> Result<Self> {
        let mut bits = 0u16;
        for &h in harmonics {
            check_harmonic(h)?;
            bits |= 1 << h;
        }
        Ok(Self { harmonics: bits, ..Self::default() })
    }

    /// Active-harmonic bitset (bit `h` set for harmonic `h`).
    pub fn bits(&self) -> u16 {
        self.harmonics
    }

    /// Active harmonics in ascending order.
    pub fn harmonics(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=MAX_HARMONICS as u8).filter(move |h| self.harmonics & (1 << h) != 0)
    }

    /// Whether harmonic `h` is active.
    pub fn has_harmonic(&self, h: u8) -> bool {
        (1..=MAX_HARMONICS as u8).contains(&h) && self.harmonics & (1 << h) != 0
    }

    /// Number of active harmonics.
    pub fn harmonic_count(&self) -> usize {
        self.harmonics.count_ones() as usize
    }

    /// Component of harmonic `h` (zero if inactive).
    pub fn q(&self, h: u8) -> QVec {
        if self.has_harmonic(h) { self.q[h as usize - 1] } else { QVec::default() }
    }

    /// Cosine component of harmonic `h`.
    pub fn x(&self, h: u8) -> f64 {
        self.q(h).x
    }

    /// Sine component of harmonic `h`.
    pub fn y(&self, h: u8) -> f64 {
        self.q(h).y
    }

    /// Overwrite harmonic `h`. Ignored for inactive harmonics.
    pub fn set_q(&mut self, h: u8, value: QVec) {
        if self.has_harmonic(h) {
            self.q[h as usize - 1] = value;
        }
    }

    /// Number of contributions.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Sum of contribution weights.
    pub fn sum_weights(&self) -> f64 {
        self.sum_weights
    }

    /// Current normalization tag.
    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Quality flag set by [`QVector::check_quality`].
    pub fn is_good_quality(&self) -> bool {
        self.good_quality
    }

    /// Flag the vector good when its sum of weights exceeds [`MIN_SUM_OF_WEIGHTS`].
    pub fn check_quality(&mut self) -> bool {
        self.good_quality = self.sum_weights > MIN_SUM_OF_WEIGHTS;
        self.good_quality
    }

    /// Force the quality flag.
    pub fn set_good_quality(&mut self, good: bool) {
        self.good_quality = good;
    }

    /// Accumulate one contribution at azimuth `phi` with weight `weight`.
    ///
    /// Only meaningful on a raw (unnormalized) vector.
    pub fn add_particle(&mut self, phi: f64, weight: f64) {
        for h in 1..=MAX_HARMONICS as u8 {
            if self.harmonics & (1 << h) != 0 {
                let (s, c) = (f64::from(h) * phi).sin_cos();
                let q = &mut self.q[h as usize - 1];
                q.x += weight * c;
                q.y += weight * s;
            }
        }
        self.n += 1;
        self.sum_weights += weight;
    }

    /// Zero the components, counters and quality; keep harmonics.
    pub fn reset(&mut self) {
        let harmonics = self.harmonics;
        *self = Self { harmonics, ..Self::default() };
    }

    /// Copy with non-finite components replaced by zero.
    pub fn sanitized(&self) -> Self {
        let mut c = self.clone();
        for q in &mut c.q {
            *q = q.sanitized();
        }
        c
    }

    /// Remove the current normalization.
    pub fn denormal(&self) -> Self {
        let mut c = self.clone();
        let scale = |q: QVec, s: f64| if s == 0.0 { QVec::default() } else { q * s };
        for h in self.harmonics() {
            let i = h as usize - 1;
            c.q[i] = match self.normalization {
                Normalization::None => self.q[i],
                Normalization::M => scale(self.q[i], self.sum_weights),
                Normalization::SqrtM if self.sum_weights > 0.0 => {
                    self.q[i] * self.sum_weights.sqrt()
                }
                Normalization::SqrtM => QVec::default(),
                Normalization::Magnitude => scale(self.q[i], self.magnitudes[i]),
            };
        }
        c.magnitudes = [0.0; MAX_HARMONICS];
        c.normalization = Normalization::None;
        c
    }

    /// Copy normalized with `mode` (de-normalizing first).
    ///
    /// A zero sum of weights (or magnitude) yields the zero vector.
    pub fn normal(&self, mode: Normalization) -> Self {
        let mut c = self.denormal();
        for h in self.harmonics() {
            let i = h as usize - 1;
            let q = c.q[i];
            c.q[i] = match mode {
                Normalization::None => q,
                Normalization::M if c.sum_weights != 0.0 => q / c.sum_weights,
                Normalization::SqrtM if c.sum_weights > 0.0 => q / c.sum_weights.sqrt(),
                Normalization::Magnitude => {
                    let m = q.norm();
                    if m != 0.0 && m.is_finite() {
                        c.magnitudes[i] = m;
                        q / m
                    } else {
                        QVec::default()
                    }
                }
                _ => QVec::default(),
            };
        }
        c.normalization = mode;
        c
    }

    /// Normalize in place.
    pub fn normalize(&mut self, mode: Normalization) {
        *self = self.normal(mode);
    }

    /// Sum of two vectors after de-normalizing both.
    ///
    /// Components are paired by rank among active harmonics, so both operands
    /// must have the same number of active harmonics. The result takes the
    /// harmonic set of `other`, carries no normalization, and treats
    /// non-finite components as zero.
    pub fn combine(&self, other: &QVector) -> Result<QVector> {
        if self.harmonic_count() != other.harmonic_count() {
            return Err(Error::StructuralMismatch(format!(
                "cannot add flow vectors with {} and {} active harmonics",
                self.harmonic_count(),
                other.harmonic_count()
            )));
        }
        let a = self.denormal();
        let b = other.denormal();
        let mut c = QVector { harmonics: other.harmonics, ..QVector::default() };
        for (ha, hb) in a.harmonics().zip(b.harmonics()) {
            let i = hb as usize - 1;
            c.q[i] = a.q[ha as usize - 1].sanitized() + b.q[i].sanitized();
        }
        c.n = a.n + b.n;
        c.sum_weights = a.sum_weights + b.sum_weights;
        c.good_quality = a.good_quality || b.good_quality;
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn vector_from(particles: &[(f64, f64)]) -> QVector {
        let mut q = QVector::new(&[1, 2, 3]).unwrap();
        for &(phi, w) in particles {
            q.add_particle(phi, w);
        }
        q.check_quality();
        q
    }

    #[test]
    fn add_particle_accumulates_harmonics() {
        let q = vector_from(&[(0.0, 1.0), (PI / 2.0, 2.0)]);
        assert_eq!(q.n(), 2);
        assert_relative_eq!(q.sum_weights(), 3.0);
        assert_relative_eq!(q.x(1), 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.y(1), 2.0, epsilon = 1e-12);
        assert_relative_eq!(q.x(2), -1.0, epsilon = 1e-12);
        assert_eq!(q.q(4), QVec::default());
    }

    #[test]
    fn rejects_invalid_harmonics() {
        assert!(QVector::new(&[0]).is_err());
        assert!(QVector::new(&[9]).is_err());
        assert_eq!(QVector::new(&[2, 4]).unwrap().harmonics().collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn zero_weight_normalizes_to_zero() {
        let mut q = QVector::new(&[1]).unwrap();
        q.set_q(1, QVec::new(0.3, 0.4));
        let m = q.normal(Normalization::M);
        assert_eq!(m.q(1), QVec::default());
        let s = q.normal(Normalization::SqrtM);
        assert_eq!(s.q(1), QVec::default());
        assert!(!q.clone().check_quality());
    }

    #[test]
    fn magnitude_normalization_is_invertible() {
        let q = vector_from(&[(0.3, 2.0), (1.1, 1.0), (2.9, 0.5)]);
        let m = q.normal(Normalization::Magnitude);
        assert_relative_eq!(m.q(1).norm(), 1.0, epsilon = 1e-12);
        let back = m.denormal();
        for h in [1u8, 2, 3] {
            assert_relative_eq!(back.x(h), q.x(h), epsilon = 1e-12);
            assert_relative_eq!(back.y(h), q.y(h), epsilon = 1e-12);
        }
    }

    #[test]
    fn combine_takes_right_bits_and_drops_nan() {
        let mut a = QVector::new(&[1, 2]).unwrap();
        a.add_particle(0.0, 1.0);
        a.set_q(2, QVec::new(f64::NAN, 1.0));
        let mut b = QVector::new(&[2, 3]).unwrap();
        b.add_particle(0.0, 1.0);
        let c = a.combine(&b).unwrap();
        assert_eq!(c.bits(), b.bits());
        assert_eq!(c.n(), 2);
        assert_relative_eq!(c.x(2), 2.0);
        assert_relative_eq!(c.x(3), 1.0);
        assert_eq!(c.normalization(), Normalization::None);

        let d = QVector::new(&[1]).unwrap();
        assert!(matches!(a.combine(&d), Err(Error::StructuralMismatch(_))));
    }

    fn mode_strategy() -> impl Strategy<Value = Normalization> {
        prop_oneof![
            Just(Normalization::None),
            Just(Normalization::M),
            Just(Normalization::SqrtM),
            Just(Normalization::Magnitude),
        ]
    }

    fn particles() -> impl Strategy<Value = Vec<(f64, f64)>> {
        proptest::collection::vec((-PI..PI, 0.1f64..10.0), 1..20)
    }

    proptest! {
        #[test]
        fn prop_normal_denormal_round_trip(parts in particles(), mode in mode_strategy()) {
            let v = vector_from(&parts);
            let back = v.normal(mode).denormal();
            let raw = v.denormal();
            for h in [1u8, 2, 3] {
                prop_assert!((back.x(h) - raw.x(h)).abs() <= 1e-9 * (1.0 + raw.x(h).abs()));
                prop_assert!((back.y(h) - raw.y(h)).abs() <= 1e-9 * (1.0 + raw.y(h).abs()));
            }
        }

        #[test]
        fn prop_degenerate_weight_is_zero_both_sides(mode in mode_strategy()) {
            let v = QVector::new(&[1, 2]).unwrap();
            let back = v.normal(mode).denormal();
            prop_assert_eq!(back.q(1), QVec::default());
            prop_assert_eq!(v.denormal().q(1), QVec::default());
        }

        #[test]
        fn prop_combine_then_normalize_matches_merged_sample(
            pa in particles(),
            pb in particles(),
            mode in mode_strategy(),
        ) {
            let a = vector_from(&pa).normal(mode);
            let b = vector_from(&pb).normal(mode);
            let merged: Vec<(f64, f64)> = pa.iter().chain(&pb).copied().collect();
            let expected = vector_from(&merged).normal(mode);
            let got = a.combine(&b).unwrap().normal(mode);
            for h in [1u8, 2, 3] {
                prop_assert!((got.x(h) - expected.x(h)).abs() <= 1e-9 * (1.0 + expected.x(h).abs()));
                prop_assert!((got.y(h) - expected.y(h)).abs() <= 1e-9 * (1.0 + expected.y(h).abs()));
            }
            prop_assert_eq!(got.n(), expected.n());
        }
    }
}
