//! Reference scenario: two four-channel detectors at fixed azimuthal
//! positions with Gaussian channel multiplicities.
//!
//! Run: `cargo test -p qn-correction --release --test reference_scenario`

use qn_core::{Axis, Normalization, VariableSchema};
use qn_correction::steps::recentering::RECENTERING;
use qn_correction::{
    ChannelScheme, ConfigurationSpec, CorrectionCalculator, CorrectionConfig, CorrectionStep,
    Detector, DetectorKind, EventClassSet, Recentering,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const N_EVENTS: usize = 1_000_000;
const CHANNEL_X: [f64; 4] = [1.75, -1.75, 1.75, -1.75];
const CHANNEL_Y: [f64; 4] = [-1.75, -1.75, 1.75, 1.75];

struct Layout {
    cent: usize,
    phi_a: usize,
    phi_b: usize,
    mult_a: usize,
    mult_b: usize,
}

fn schema() -> (VariableSchema, Layout) {
    let mut s = VariableSchema::new();
    let cent = s.add("Cent", 1).unwrap().id();
    let phi_a = s.add("PhiA", 4).unwrap().id();
    let phi_b = s.add("PhiB", 4).unwrap().id();
    let mult_a = s.add("MultA", 4).unwrap().id();
    let mult_b = s.add("MultB", 4).unwrap().id();
    (s, Layout { cent, phi_a, phi_b, mult_a, mult_b })
}

fn fill_event(values: &mut [f64], layout: &Layout, cent: f64, mult: impl Fn(usize, usize) -> f64) {
    values[layout.cent] = cent;
    for ch in 0..4 {
        let phi = CHANNEL_Y[ch].atan2(CHANNEL_X[ch]);
        values[layout.phi_a + ch] = phi;
        values[layout.phi_b + ch] = phi;
        values[layout.mult_a + ch] = mult(0, ch);
        values[layout.mult_b + ch] = mult(1, ch);
    }
}

fn build_calculator(schema: &VariableSchema) -> CorrectionCalculator {
    let mut classes = EventClassSet::new();
    classes
        .add(schema.get("Cent").unwrap(), Axis::uniform("Cent", 100, 0.0, 100.0).unwrap())
        .unwrap();
    let axes = classes.axes().to_vec();
    let mut calc = CorrectionCalculator::new(schema.clone(), classes);
    for (name, phi, mult) in [("AA", "PhiA", "MultA"), ("BB", "PhiB", "MultB")] {
        let mut d = Detector::new(
            name,
            DetectorKind::Channelized,
            schema.get(phi).unwrap(),
            Some(schema.get(mult).unwrap()),
            Vec::new(),
        )
        .unwrap();
        let spec = ConfigurationSpec {
            event_axes: &axes,
            harmonics: &[1],
            normalization: Normalization::M,
            scheme: Some(ChannelScheme::new(vec![true; 4], Some(vec![0; 4]), None).unwrap()),
            cuts: Default::default(),
        };
        d.configure(spec, |owner| {
            let step = Recentering::new(owner, &axes, &[1], 10, false)?;
            Ok(vec![Box::new(step) as Box<dyn CorrectionStep>])
        })
        .unwrap();
        calc.add_detector(d).unwrap();
    }
    calc
}

#[test]
fn test_recentering_drives_first_bin_mean_to_zero() {
    let (schema, layout) = schema();
    let mut calc = build_calculator(&schema);
    let mut rng = StdRng::seed_from_u64(42);
    let gauss = Normal::new(0.0, 20.0).unwrap();
    let mut values = schema.new_values();

    let mut corrected = 0usize;
    for _ in 0..N_EVENTS {
        let mults: [[f64; 4]; 2] = std::array::from_fn(|_| std::array::from_fn(|_| gauss.sample(&mut rng)));
        fill_event(&mut values, &layout, rng.random_range(0.0..100.0), |d, ch| mults[d][ch]);

        let ready = calc.configuration("AA").unwrap().core().qn_steps()[0].is_calibrated(0);
        calc.process_event(&values).unwrap();
        if ready && calc.class_bin() == Some(0) {
            let q = calc.configuration("AA").unwrap().core().qn_vector(RECENTERING);
            assert!(q.x(1).is_finite() && q.y(1).is_finite());
            corrected += 1;
        }
    }
    assert!(corrected > 1000);
    let report = calc.finalize();
    assert_eq!(report.get("AA", RECENTERING).unwrap().coverage, 1.0);

    let store = calc.export_calibration();
    let profile = store.get("AA", RECENTERING, "mean_qn").unwrap();
    for component in 0..2 {
        let s = profile.get(0, component);
        assert!(s.entries() > 1000, "too few entries in bin 0: {}", s.entries());
        assert!(s.mean().is_finite() && s.error().is_finite());
        assert!(s.mean().abs() <= 5.0 * s.error(), "component {component}: {} ± {}", s.mean(), s.error());
    }
}

#[test]
fn test_multiplicity_outlier_keeps_calibration_finite() {
    let (schema, layout) = schema();
    let config = CorrectionConfig::from_json_str(
        r#"{
            "event_classes": [{"variable":"Cent","axis":{"name":"Cent","n_bins":100,"low":0,"high":100}}],
            "detectors": [
                {"name":"AA","kind":"channelized","phi":"PhiA","weight":"MultA","harmonics":[1],
                 "normalization":"m","channels":{"used":[true,true,true,true],"groups":[0,0,0,0]},
                 "steps":[{"type":"recentering"}]},
                {"name":"BB","kind":"channelized","phi":"PhiB","weight":"MultB","harmonics":[1],
                 "normalization":"m","channels":{"used":[true,true,true,true],"groups":[0,0,0,0]},
                 "steps":[{"type":"recentering"}]}
            ]
        }"#,
    )
    .unwrap();
    let mut calc = CorrectionCalculator::from_config(&schema, &config).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let gauss = Normal::new(0.0, 20.0).unwrap();
    let mut values = schema.new_values();
    for _ in 0..N_EVENTS {
        let mults: [[f64; 4]; 2] = std::array::from_fn(|_| std::array::from_fn(|_| gauss.sample(&mut rng)));
        fill_event(&mut values, &layout, rng.random_range(0.0..100.0), |d, ch| mults[d][ch]);
        calc.process_event(&values).unwrap();
    }

    fill_event(&mut values, &layout, 13.1, |_, _| 1.0);
    values[layout.mult_a] = 100_000_000.0;
    assert!(calc.process_event(&values).unwrap());
    for stage in ["raw", "plain", RECENTERING] {
        for q in calc.qn_container("AA", stage).unwrap().iter() {
            assert!(q.x(1).is_finite() && q.y(1).is_finite());
        }
    }

    let report = calc.finalize();
    assert_eq!(report.events, N_EVENTS as u64 + 1);
    assert!(report.is_complete());

    let store = calc.export_calibration();
    assert!(!store.is_empty());
    for key in store.keys() {
        let mut parts = key.splitn(3, '/');
        let (c, s, p) = (parts.next().unwrap(), parts.next().unwrap(), parts.next().unwrap());
        for stat in store.get(c, s, p).unwrap().container().iter() {
            assert!(stat.mean().is_finite(), "{key}: non-finite mean");
            assert!(stat.sum2().is_finite(), "{key}: non-finite sum2");
            assert!(stat.error().is_finite(), "{key}: non-finite error");
        }
    }
}
