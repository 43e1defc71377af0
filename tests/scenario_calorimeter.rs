//! End-to-end scenarios 2 and 3: pure-electromagnetic tower emission, and track/tower e-flow
//! subtraction, with zero resolution smearing so the expected outputs are exact.

use fastdet_reco::calorimeter::Calorimeter;
use fastdet_reco::config::{ModuleConfig, ParamValue};
use fastdet_reco::event::EventStore;
use fastdet_reco::four_vector::FourVector;
use fastdet_reco::module::Module;
use fastdet_reco::rng::StreamRng;

fn single_bin_config() -> ModuleConfig {
    let eta_edges = ParamValue::Array(vec![ParamValue::Double(-1.0), ParamValue::Double(1.0)]);
    let phi_edges = ParamValue::Array(vec![ParamValue::Double(-3.2), ParamValue::Double(3.2)]);
    ModuleConfig::new("calorimeter")
        .with("EtaPhiBins", ParamValue::Array(vec![eta_edges, phi_edges]))
        .with("SmearTowerCenter", ParamValue::Bool(false))
}

fn fraction(pid: i64, ecal: f64, hcal: f64) -> ParamValue {
    ParamValue::Array(vec![
        ParamValue::Int(pid),
        ParamValue::Array(vec![ParamValue::Double(ecal), ParamValue::Double(hcal)]),
    ])
}

#[test]
fn three_electrons_in_one_bin_form_a_tower_and_a_photon() {
    let mut store = EventStore::new();
    store.declare("particles");
    store.declare("tracks");

    for _ in 0..3 {
        let id = store.factory_mut().new_candidate();
        let c = store.factory_mut().get_mut(id);
        c.pid = 11;
        c.momentum = FourVector::new(0.0, 0.0, 0.0, 10.0);
        c.position = FourVector::from_pt_eta_phi_e(1.0, 0.0, 0.0, 0.0);
        store.push("particles", id);
    }

    let mut calo = Calorimeter::new();
    let config = single_bin_config().with("EnergyFraction", ParamValue::Array(vec![fraction(11, 1.0, 0.0)]));
    calo.init(&config, &mut store).unwrap();
    let mut rng = StreamRng::for_event(2, 1);
    calo.process(&mut store, &mut rng);

    let towers = store.get("towers").unwrap();
    assert_eq!(towers.len(), 1);
    let tower = store.factory().get(towers[0]);
    assert!((tower.e_em - 30.0).abs() < 1e-9);
    assert!((tower.e_had).abs() < 1e-9);

    let photons = store.get("photons").unwrap();
    assert_eq!(photons.len(), 1);

    assert!(store.get("eflowTracks").unwrap().is_empty());
}

#[test]
fn track_and_neutral_hadron_share_a_tower_and_emit_separately() {
    let mut store = EventStore::new();
    store.declare("particles");
    store.declare("tracks");

    let neutral = store.factory_mut().new_candidate();
    {
        let c = store.factory_mut().get_mut(neutral);
        c.pid = 2112;
        c.momentum = FourVector::new(0.0, 0.0, 0.0, 10.0);
        c.position = FourVector::from_pt_eta_phi_e(1.0, 0.0, 0.0, 0.0);
    }
    store.push("particles", neutral);

    let track = store.factory_mut().new_candidate();
    {
        let c = store.factory_mut().get_mut(track);
        c.pid = 211;
        c.charge = 1;
        c.momentum = FourVector::new(20.0, 0.0, 0.0, 20.0);
        c.position = FourVector::from_pt_eta_phi_e(1.0, 0.0, 0.0, 0.0);
    }
    store.push("tracks", track);

    let mut calo = Calorimeter::new();
    let config = single_bin_config().with(
        "EnergyFraction",
        ParamValue::Array(vec![fraction(2112, 0.0, 1.0), fraction(211, 0.3, 0.7)]),
    );
    calo.init(&config, &mut store).unwrap();
    let mut rng = StreamRng::for_event(2, 2);
    calo.process(&mut store, &mut rng);

    let eflow_tracks = store.get("eflowTracks").unwrap();
    assert_eq!(eflow_tracks, &[track]);

    let eflow_neutrals = store.get("eflowNeutralHadrons").unwrap();
    assert_eq!(eflow_neutrals.len(), 1);
    let residual = store.factory().get(eflow_neutrals[0]);
    assert!((residual.e_had - 10.0).abs() < 1e-9);

    assert!(store.get("eflowPhotons").unwrap().is_empty());
}
