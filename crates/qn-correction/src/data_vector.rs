//! Per-event input data vectors.

/// One accepted track or channel hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataVector {
    /// Channel number (element index for tracking detectors).
    pub channel: usize,
    /// Azimuthal angle.
    pub phi: f64,
    /// Raw weight (after hard-coded channel weights).
    pub weight: f64,
    /// Weight after input-data equalization; equals `weight` until corrected.
    pub equalized_weight: f64,
}

impl DataVector {
    /// New data vector with `equalized_weight == weight`.
    pub fn new(channel: usize, phi: f64, weight: f64) -> Self {
        Self { channel, phi, weight, equalized_weight: weight }
    }
}
