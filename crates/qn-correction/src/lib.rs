//! # qn-correction
//!
//! Streaming calibration and correction of detector flow vectors.
//!
//! Each detector is split into per-bin [`DetectorConfiguration`]s that own a
//! chain of [`CorrectionStep`]s. Steps calibrate themselves per event-class bin
//! while events stream through and start correcting once a bin has enough
//! entries. The [`CorrectionCalculator`] drives every configuration through
//! the same three phases per event and exports the accumulated calibration
//! as a [`CalibrationStore`] for the next pass.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod calculator;
pub mod config;
pub mod data_vector;
pub mod detector;
pub mod event_class;
pub mod profile;
pub mod report;
pub mod steps;

pub use calculator::CorrectionCalculator;
pub use config::{AxisConfig, BinningConfig, CorrectionConfig, DetectorConfig, StepConfig};
pub use data_vector::DataVector;
pub use detector::{
    ChannelScheme, ChannelizedDetector, ConfigurationSpec, Detector, DetectorConfiguration,
    DetectorCore, DetectorKind, PipelineState, TrackingDetector,
};
pub use event_class::EventClassSet;
pub use profile::{BinState, CalibrationProfile, CalibrationState, CalibrationStore};
pub use report::{CalibrationReport, CoverageEntry};
pub use steps::{
    Alignment, CorrectionStep, EqualizationMethod, GainEqualization, QnEvent, Recentering,
    StepContext, StepCoverage, StepStage, StepStatus, TwistAndRescale, TwistRescaleMethod,
};
