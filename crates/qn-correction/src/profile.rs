//! Calibration profiles, per-bin readiness and their persistence.
//!
//! A [`CalibrationProfile`] is a `BinnedContainer<Statistic>` over the event
//! class axes plus a trailing discrete `component` axis. A
//! [`CalibrationState`] tracks, per event-class bin, whether a step has
//! collected enough entries to start correcting. Profiles are exchanged with
//! earlier or later runs through a [`CalibrationStore`].

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use qn_core::{Axis, BinnedContainer, Error, Result, Statistic};
use serde::{Deserialize, Serialize};

/// Name of the trailing component axis.
pub const COMPONENT_AXIS: &str = "component";

/// Event-class binned statistics with `n_components` slots per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    name: String,
    n_components: usize,
    data: BinnedContainer<Statistic>,
}

impl CalibrationProfile {
    /// Empty profile over `event_axes` with `n_components` components.
    pub fn new(name: impl Into<String>, event_axes: &[Axis], n_components: usize) -> Result<Self> {
        let name = name.into();
        if n_components == 0 {
            return Err(Error::Validation(format!("profile '{name}' has no components")));
        }
        let mut axes = event_axes.to_vec();
        axes.push(Axis::discrete(COMPONENT_AXIS, n_components)?);
        let data = BinnedContainer::with_axes(axes)?;
        Ok(Self { name, n_components, data })
    }

    /// Profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Components per event-class bin.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Number of event-class bins.
    pub fn n_event_bins(&self) -> usize {
        self.data.len() / self.n_components
    }

    /// Underlying container (event axes followed by the component axis).
    pub fn container(&self) -> &BinnedContainer<Statistic> {
        &self.data
    }

    /// Statistic of `component` in event-class bin `class_bin`.
    pub fn get(&self, class_bin: usize, component: usize) -> Statistic {
        self.data
            .get(class_bin * self.n_components + component)
            .copied()
            .unwrap_or_default()
    }

    /// Mean of `component` in `class_bin`.
    pub fn mean(&self, class_bin: usize, component: usize) -> f64 {
        self.get(class_bin, component).mean()
    }

    /// Largest entry count over the components of `class_bin`.
    pub fn bin_entries(&self, class_bin: usize) -> u64 {
        (0..self.n_components).map(|c| self.get(class_bin, c).entries()).max().unwrap_or(0)
    }

    /// Add one value. Non-finite values are dropped with a warning.
    pub fn fill(&mut self, class_bin: usize, component: usize, value: f64) -> bool {
        if !value.is_finite() {
            log::warn!(
                "{}: dropping non-finite value for bin {class_bin}, component {component}",
                self.name
            );
            return false;
        }
        if component >= self.n_components {
            return false;
        }
        match self.data.get_mut(class_bin * self.n_components + component) {
            Some(s) => {
                s.fill(value);
                true
            }
            None => false,
        }
    }

    /// Merge a profile accumulated on a disjoint set of events.
    pub fn merge(&mut self, other: &CalibrationProfile) -> Result<()> {
        self.check_compatible(other)?;
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            a.merge(b);
        }
        Ok(())
    }

    /// Fail unless `other` has the same axes and component count.
    pub fn check_compatible(&self, other: &CalibrationProfile) -> Result<()> {
        if self.n_components != other.n_components {
            return Err(Error::StructuralMismatch(format!(
                "profile '{}' has {} components, '{}' has {}",
                self.name, self.n_components, other.name, other.n_components
            )));
        }
        self.data.check_same_axes(&other.data)
    }

    /// Reset every statistic, keeping the binning.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Readiness of one event-class bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinState {
    /// Still collecting; the step is the identity.
    Accumulating,
    /// Enough entries; the step corrects.
    Ready,
}

/// Monotonic per-bin `Accumulating -> Ready` state machine.
#[derive(Debug, Clone)]
pub struct CalibrationState {
    min_entries: u64,
    counts: Vec<u64>,
    ready: Vec<bool>,
}

impl CalibrationState {
    /// All bins accumulating.
    pub fn new(n_bins: usize, min_entries: u64) -> Self {
        Self { min_entries, counts: vec![0; n_bins], ready: vec![min_entries == 0; n_bins] }
    }

    /// Entry threshold.
    pub fn min_entries(&self) -> u64 {
        self.min_entries
    }

    /// Count one entry for `bin`. Returns `true` on the transition to Ready.
    pub fn record(&mut self, bin: usize) -> bool {
        self.record_n(bin, 1)
    }

    /// Count `n` entries for `bin`.
    pub fn record_n(&mut self, bin: usize, n: u64) -> bool {
        let (Some(count), Some(ready)) = (self.counts.get_mut(bin), self.ready.get_mut(bin)) else {
            return false;
        };
        *count += n;
        if !*ready && *count >= self.min_entries {
            *ready = true;
            return true;
        }
        false
    }

    /// State of `bin`.
    pub fn state(&self, bin: usize) -> BinState {
        if self.is_ready(bin) { BinState::Ready } else { BinState::Accumulating }
    }

    /// Whether `bin` is Ready.
    pub fn is_ready(&self, bin: usize) -> bool {
        self.ready.get(bin).copied().unwrap_or(false)
    }

    /// Entries counted for `bin`.
    pub fn entries(&self, bin: usize) -> u64 {
        self.counts.get(bin).copied().unwrap_or(0)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Number of bins that reached Ready.
    pub fn ready_bins(&self) -> usize {
        self.ready.iter().filter(|r| **r).count()
    }

    /// Back to the initial state: every counter zero.
    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.ready.fill(self.min_entries == 0);
    }

    /// Seed the counters from an ingress profile.
    pub fn seed_from(&mut self, profile: &CalibrationProfile) {
        for bin in 0..self.counts.len() {
            let n = profile.bin_entries(bin);
            self.counts[bin] = 0;
            self.record_n(bin, n);
        }
    }
}

/// Named profiles keyed `"<configuration>/<step>/<profile>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStore {
    profiles: BTreeMap<String, CalibrationProfile>,
}

impl CalibrationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage key.
    pub fn key(configuration: &str, step: &str, profile: &str) -> String {
        format!("{configuration}/{step}/{profile}")
    }

    /// Insert (or replace) a profile.
    pub fn insert(&mut self, configuration: &str, step: &str, profile: CalibrationProfile) {
        let key = Self::key(configuration, step, profile.name());
        self.profiles.insert(key, profile);
    }

    /// Look up a profile.
    pub fn get(&self, configuration: &str, step: &str, profile: &str) -> Option<&CalibrationProfile> {
        self.profiles.get(&Self::key(configuration, step, profile))
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// No profiles stored.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Merge a store produced from a disjoint event sample.
    ///
    /// Profiles present in both are merged statistic by statistic; the rest
    /// are copied.
    pub fn merge(&mut self, other: &CalibrationStore) -> Result<()> {
        for (key, profile) in &other.profiles {
            match self.profiles.get_mut(key) {
                Some(existing) => existing.merge(profile)?,
                None => {
                    self.profiles.insert(key.clone(), profile.clone());
                }
            }
        }
        Ok(())
    }

    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON string, validating profile shapes.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let store: CalibrationStore = serde_json::from_str(s)?;
        store.validate()?;
        Ok(store)
    }

    /// Write as JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read from JSON.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let store: CalibrationStore = serde_json::from_reader(reader)?;
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        for (key, p) in &self.profiles {
            p.data.check_shape()?;
            let last = p.data.axes().last().map(|a| (a.name(), a.len()));
            if last != Some((COMPONENT_AXIS, p.n_components)) {
                return Err(Error::StructuralMismatch(format!(
                    "profile '{key}' lacks a {}-bin '{COMPONENT_AXIS}' axis",
                    p.n_components
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cent_axes() -> Vec<Axis> {
        vec![Axis::uniform("Centrality", 4, 0.0, 100.0).unwrap()]
    }

    #[test]
    fn fill_and_read_components() {
        let mut p = CalibrationProfile::new("rec", &cent_axes(), 2).unwrap();
        assert_eq!(p.n_event_bins(), 4);
        assert!(p.fill(1, 0, 2.0));
        assert!(p.fill(1, 0, 4.0));
        assert!(p.fill(1, 1, -1.0));
        assert!(!p.fill(1, 1, f64::NAN));
        assert!(!p.fill(1, 2, 1.0));
        assert_relative_eq!(p.mean(1, 0), 3.0);
        assert_eq!(p.get(1, 1).entries(), 1);
        assert_eq!(p.bin_entries(1), 2);
        assert_eq!(p.bin_entries(0), 0);
    }

    #[test]
    fn state_is_monotonic() {
        let mut s = CalibrationState::new(2, 3);
        assert_eq!(s.state(0), BinState::Accumulating);
        assert!(!s.record(0));
        assert!(!s.record(0));
        assert!(s.record(0));
        assert!(!s.record(0));
        assert_eq!(s.state(0), BinState::Ready);
        assert_eq!(s.ready_bins(), 1);
        assert!(!s.record(7));
    }

    #[test]
    fn reset_returns_to_accumulating() {
        let mut s = CalibrationState::new(2, 2);
        s.record_n(1, 5);
        assert!(s.is_ready(1));
        s.reset();
        assert_eq!(s.state(1), BinState::Accumulating);
        assert_eq!(s.entries(1), 0);
        assert!(s.record_n(1, 2));
    }

    #[test]
    fn zero_threshold_starts_ready() {
        let s = CalibrationState::new(3, 0);
        assert_eq!(s.ready_bins(), 3);
    }

    #[test]
    fn seeded_state_from_ingress_profile() {
        let mut p = CalibrationProfile::new("rec", &cent_axes(), 1).unwrap();
        for _ in 0..5 {
            p.fill(2, 0, 1.0);
        }
        let mut s = CalibrationState::new(4, 5);
        s.seed_from(&p);
        assert!(s.is_ready(2));
        assert!(!s.is_ready(0));
    }

    #[test]
    fn merge_rejects_different_binning() {
        let mut a = CalibrationProfile::new("rec", &cent_axes(), 2).unwrap();
        let b = CalibrationProfile::new("rec", &[Axis::uniform("Centrality", 5, 0.0, 100.0).unwrap()], 2)
            .unwrap();
        assert!(matches!(a.merge(&b), Err(Error::StructuralMismatch(_))));
        let mut c = a.clone();
        c.fill(0, 0, 1.0);
        a.merge(&c).unwrap();
        assert_eq!(a.get(0, 0).entries(), 1);
    }

    #[test]
    fn store_json_round_trip() {
        let mut p = CalibrationProfile::new("rec", &cent_axes(), 2).unwrap();
        p.fill(0, 1, 0.5);
        let mut store = CalibrationStore::new();
        store.insert("AA", "recentering", p.clone());
        let json = store.to_json_string().unwrap();
        let back = CalibrationStore::from_json_str(&json).unwrap();
        assert_eq!(back.get("AA", "recentering", "rec"), Some(&p));
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["AA/recentering/rec"]);

        let path = std::env::temp_dir().join(format!("qn_store_{}.json", std::process::id()));
        store.save_json(&path).unwrap();
        let loaded = CalibrationStore::load_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, store);
    }

    #[test]
    fn malformed_store_is_an_error() {
        let mut store = CalibrationStore::new();
        store.insert("AA", "recentering", CalibrationProfile::new("rec", &cent_axes(), 1).unwrap());
        let json = store.to_json_string().unwrap();
        let edges = r#"[0.0,25.0,50.0,75.0,100.0]"#;
        assert!(json.contains(edges));
        let empty = json.replace(edges, "[]");
        assert!(matches!(CalibrationStore::from_json_str(&empty), Err(Error::Json(_))));
        let unsorted = json.replace(edges, "[0.0,50.0,25.0,75.0,100.0]");
        assert!(matches!(CalibrationStore::from_json_str(&unsorted), Err(Error::Json(_))));
    }

    #[test]
    fn store_merge_adds_entries() {
        let mut p = CalibrationProfile::new("rec", &cent_axes(), 1).unwrap();
        p.fill(0, 0, 1.0);
        let mut a = CalibrationStore::new();
        a.insert("AA", "recentering", p.clone());
        let mut b = CalibrationStore::new();
        b.insert("AA", "recentering", p);
        b.insert("BB", "recentering", CalibrationProfile::new("rec", &cent_axes(), 1).unwrap());
        a.merge(&b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.get("AA", "recentering", "rec").unwrap().get(0, 0).entries(), 2);
    }
}
