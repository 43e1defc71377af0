//! End-to-end scenarios 4-6: the deterministic-annealing vertex finder separating clusters in z,
//! in t, and rejecting outliers.

use fastdet_reco::candidate::{CandidateId, Helix};
use fastdet_reco::config::{ModuleConfig, ParamValue};
use fastdet_reco::event::EventStore;
use fastdet_reco::four_vector::FourVector;
use fastdet_reco::module::Module;
use fastdet_reco::rng::StreamRng;
use fastdet_reco::vertex_finder::VertexFinderDa4D;

fn push_track(store: &mut EventStore, z: f64, t: f64, pt: f64) -> CandidateId {
    let id = store.factory_mut().new_candidate();
    let c = store.factory_mut().get_mut(id);
    c.helix = Helix {
        dz: z,
        d0: 0.0,
        dz_error: 0.02,
        pt,
        ctg_theta: 0.0,
        ..Helix::default()
    };
    c.position = FourVector::new(0.0, 0.0, 0.0, t);
    c.path_length = 0.0;
    store.push("tracks", id);
    id
}

fn base_config() -> ModuleConfig {
    ModuleConfig::new("vertexing")
        .with("PtMin", ParamValue::Double(0.1))
        .with("VertexZSize", ParamValue::Double(0.05))
        .with("VertexTSize", ParamValue::Double(0.01))
        .with("TrackTimeResolution", ParamValue::Double(0.01))
        .with("DzCutOff", ParamValue::Double(40.0))
        .with("DtCutOff", ParamValue::Double(0.16))
}

fn run(store: &mut EventStore, config: ModuleConfig) {
    let mut finder = VertexFinderDa4D::new();
    finder.init(&config, store).unwrap();
    let mut rng = StreamRng::for_event(4, 1);
    finder.process(store, &mut rng);
}

#[test]
fn two_vertices_separated_in_z_are_both_fully_reconstructed() {
    let mut store = EventStore::new();
    store.declare("tracks");
    for _ in 0..20 {
        push_track(&mut store, 0.0, 0.0, 2.0);
    }
    for _ in 0..20 {
        push_track(&mut store, 2.0, 0.0, 2.0);
    }

    run(&mut store, base_config());

    let vertices = store.get("vertices").unwrap().to_vec();
    assert!(vertices.len() >= 2, "expected at least two reconstructed vertices");

    let total_ndf: i32 = vertices.iter().map(|&id| store.factory().get(id).cluster_ndf).sum();
    assert_eq!(total_ndf, 40, "every track should be assigned, none to noise");

    let zs: Vec<f64> = vertices.iter().map(|&id| store.factory().get(id).position.z).collect();
    let min_z = zs.iter().cloned().fold(f64::MAX, f64::min);
    let max_z = zs.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max_z - min_z > 1.0, "the two clusters should separate by roughly 2mm in z");
}

#[test]
fn two_vertices_separated_in_t_are_both_fully_reconstructed() {
    let mut store = EventStore::new();
    store.declare("tracks");
    for _ in 0..20 {
        push_track(&mut store, 0.0, -0.03, 2.0);
    }
    for _ in 0..20 {
        push_track(&mut store, 0.0, 0.03, 2.0);
    }

    let config = base_config().with("VertexZSize", ParamValue::Double(1.0));
    run(&mut store, config);

    let vertices = store.get("vertices").unwrap().to_vec();
    assert!(vertices.len() >= 2, "expected at least two reconstructed vertices");

    let total_ndf: i32 = vertices.iter().map(|&id| store.factory().get(id).cluster_ndf).sum();
    assert_eq!(total_ndf, 40);

    let ts: Vec<f64> = vertices.iter().map(|&id| store.factory().get(id).position.t).collect();
    let min_t = ts.iter().cloned().fold(f64::MAX, f64::min);
    let max_t = ts.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max_t - min_t > 0.02, "the two clusters should separate on the t axis");
}

#[test]
fn displaced_outlier_tracks_are_rejected_from_the_signal_vertex() {
    let mut store = EventStore::new();
    store.declare("tracks");
    for _ in 0..10 {
        push_track(&mut store, 0.0, 0.0, 2.0);
    }
    let outlier_a = push_track(&mut store, 10.0, 0.2, 2.0);
    let outlier_b = push_track(&mut store, 10.0, 0.2, 2.0);

    run(&mut store, base_config());

    let vertices = store.get("vertices").unwrap().to_vec();
    assert_eq!(vertices.len(), 1, "outliers should not form their own stable vertex");
    assert_eq!(store.factory().get(vertices[0]).cluster_ndf, 10);

    assert_eq!(store.factory().get(outlier_a).cluster_index, -1);
    assert_eq!(store.factory().get(outlier_b).cluster_index, -1);
}

#[test]
fn single_track_yields_one_vertex_at_its_own_position() {
    let mut store = EventStore::new();
    store.declare("tracks");
    let track = push_track(&mut store, 1.5, 0.02, 3.0);

    run(&mut store, base_config());

    let vertices = store.get("vertices").unwrap().to_vec();
    assert_eq!(vertices.len(), 1);
    let vertex = store.factory().get(vertices[0]);
    assert_eq!(vertex.cluster_ndf, 1);
    assert!((vertex.position.z - 1.5).abs() < 1e-6);
    assert_eq!(store.factory().get(track).cluster_index, 0);
}
