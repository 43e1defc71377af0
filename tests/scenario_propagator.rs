//! End-to-end scenario 1: a neutral particle with no magnetic field traverses a straight line to
//! the calorimeter cylinder's barrel surface.

use fastdet_reco::candidate::CandidateId;
use fastdet_reco::config::{ModuleConfig, ParamValue};
use fastdet_reco::event::EventStore;
use fastdet_reco::four_vector::FourVector;
use fastdet_reco::module::Module;
use fastdet_reco::propagator::ParticlePropagator;
use fastdet_reco::rng::StreamRng;

fn photon_at_origin(store: &mut EventStore) -> CandidateId {
    let id = store.factory_mut().new_candidate();
    let c = store.factory_mut().get_mut(id);
    c.pid = 22;
    c.charge = 0;
    c.momentum = FourVector::new(10.0, 0.0, 0.0, 10.0);
    c.position = FourVector::zero();
    id
}

#[test]
fn straight_line_neutral_reaches_barrel_at_expected_time() {
    let mut store = EventStore::new();
    store.declare("stableParticles");
    let particle = photon_at_origin(&mut store);
    store.push("stableParticles", particle);

    let mut propagator = ParticlePropagator::new();
    let config = ModuleConfig::new("propagator")
        .with("Radius", ParamValue::Double(1.0))
        .with("HalfLength", ParamValue::Double(3.0))
        .with("Bz", ParamValue::Double(0.0));
    propagator.init(&config, &mut store).unwrap();

    let mut rng = StreamRng::for_event(1, 1);
    propagator.process(&mut store, &mut rng);

    let out = store.get("stableParticles").unwrap();
    assert_eq!(out.len(), 1);
    let produced = store.factory().get(out[0]);

    assert!((produced.position.x - 1000.0).abs() < 1e-6);
    assert!((produced.position.y).abs() < 1e-9);
    assert!((produced.position.z).abs() < 1e-9);
    assert!((produced.position.t - 3.336).abs() < 1e-3);
    assert!((produced.path_length - 1000.0).abs() < 1e-6);

    let neutrals = store.get("neutralParticles").unwrap();
    assert_eq!(neutrals, &[out[0]]);
}

#[test]
fn already_propagated_candidate_passes_through_unchanged() {
    let mut store = EventStore::new();
    store.declare("stableParticles");
    let id = store.factory_mut().new_candidate();
    {
        let c = store.factory_mut().get_mut(id);
        c.charge = 0;
        c.momentum = FourVector::new(1.0, 0.0, 0.0, 1.0);
        c.position = FourVector::new(5000.0, 0.0, 0.0, 7.0);
    }
    store.push("stableParticles", id);

    let mut propagator = ParticlePropagator::new();
    let config = ModuleConfig::new("propagator")
        .with("Radius", ParamValue::Double(1.0))
        .with("HalfLength", ParamValue::Double(3.0));
    propagator.init(&config, &mut store).unwrap();

    let mut rng = StreamRng::for_event(1, 1);
    propagator.process(&mut store, &mut rng);

    let out = store.get("stableParticles").unwrap();
    let produced = store.factory().get(out[0]);
    assert!((produced.position.x - 5000.0).abs() < 1e-9);
    assert!((produced.position.t - 7.0).abs() < 1e-9);
    assert_eq!(produced.path_length, 0.0);
}
