//! Segmented eta-phi calorimeter: tower accumulation, resolution smearing, and energy flow.

use std::collections::HashMap;

use itertools::Itertools;

use crate::candidate::CandidateId;
use crate::config::ModuleConfig;
use crate::error::Result;
use crate::event::EventStore;
use crate::module::Module;
use crate::pdg::{is_electromagnetic, DEFAULT_KEY};
use crate::rng::StreamRng;

/// Stochastic/noise/constant calorimeter resolution parametrization,
/// `sigma(E) = E * sqrt(S^2/E + N^2/E^2 + C^2)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolutionFormula {
    /// Stochastic term, GeV^0.5.
    pub stochastic: f64,
    /// Noise term, GeV.
    pub noise: f64,
    /// Constant term, dimensionless.
    pub constant: f64,
}

impl ResolutionFormula {
    fn from_config(config: &ModuleConfig, prefix: &str) -> Self {
        Self {
            stochastic: config.f64_or(&format!("{prefix}ResolutionStochastic"), 0.0),
            noise: config.f64_or(&format!("{prefix}ResolutionNoise"), 0.0),
            constant: config.f64_or(&format!("{prefix}ResolutionConstant"), 0.0),
        }
    }

    /// Evaluates the absolute energy resolution at `energy`.
    #[must_use]
    pub fn sigma(&self, energy: f64) -> f64 {
        if energy <= 0.0 {
            return 0.0;
        }
        let relative2 = (self.stochastic * self.stochastic) / energy
            + (self.noise * self.noise) / (energy * energy)
            + self.constant * self.constant;
        energy * relative2.max(0.0).sqrt()
    }
}

/// A PDG-id-keyed `(f_ECAL, f_HCAL)` table with a fall-through default entry.
#[derive(Clone, Debug, Default)]
pub struct FractionMap(HashMap<i32, (f64, f64)>);

impl FractionMap {
    fn from_config(config: &ModuleConfig, key: &str) -> Result<Self> {
        let mut map = HashMap::new();
        map.insert(DEFAULT_KEY, (0.0, 1.0));
        if let Some(crate::config::ParamValue::Array(entries)) = config.params.get(key) {
            for entry in entries {
                let crate::config::ParamValue::Array(pair) = entry else { continue };
                let [pid, crate::config::ParamValue::Array(fracs)] = pair.as_slice() else { continue };
                let (Some(pid), [ecal, hcal]) = (as_i32(pid), fracs.as_slice()) else { continue };
                let (Some(ecal), Some(hcal)) = (as_f64(ecal), as_f64(hcal)) else { continue };
                map.insert(pid, (ecal, hcal));
            }
        }
        Ok(Self(map))
    }

    fn lookup(&self, abs_pid: i32) -> (f64, f64) {
        self.0
            .get(&abs_pid)
            .copied()
            .unwrap_or_else(|| self.0[&DEFAULT_KEY])
    }
}

fn as_i32(value: &crate::config::ParamValue) -> Option<i32> {
    match value {
        crate::config::ParamValue::Int(v) => Some(*v as i32),
        _ => None,
    }
}

fn as_f64(value: &crate::config::ParamValue) -> Option<f64> {
    match value {
        crate::config::ParamValue::Int(v) => Some(*v as f64),
        crate::config::ParamValue::Double(v) => Some(*v),
        _ => None,
    }
}

/// A single eta-bin's sorted phi edges.
#[derive(Clone, Debug, Default)]
struct EtaBin {
    phi_edges: Vec<f64>,
}

/// Accumulator for one (etaBin, phiBin) tower while iterating hits in sort order.
#[derive(Default)]
struct TowerAccumulator {
    eta_center: f64,
    phi_center: f64,
    edges: (f64, f64, f64, f64),
    tower_e_ecal: f64,
    tower_e_hcal: f64,
    track_e_ecal: f64,
    track_e_hcal: f64,
    tower_time_ecal: f64,
    tower_time_hcal: f64,
    tower_time_weight_ecal: f64,
    tower_time_weight_hcal: f64,
    track_hits: Vec<CandidateId>,
    photon_hits: u32,
    members: Vec<CandidateId>,
}

/// One classified hit: which bin it lands in, whether it is a track hit, and a back-reference to
/// the particle/track candidate.
struct Hit {
    eta_bin: usize,
    phi_bin: usize,
    is_track: bool,
    is_photon_like: bool,
    candidate: CandidateId,
    e_ecal: f64,
    e_hcal: f64,
}

/// Projects particles and tracks into a non-uniform eta-phi grid, accumulates per-tower energy,
/// smears it, and emits towers plus energy-flow tracks/photons/neutral hadrons.
pub struct Calorimeter {
    eta_bins: Vec<f64>,
    phi_bins: Vec<EtaBin>,
    fractions: FractionMap,

    ecal_resolution: ResolutionFormula,
    hcal_resolution: ResolutionFormula,
    ecal_energy_min: f64,
    hcal_energy_min: f64,
    ecal_significance_min: f64,
    hcal_significance_min: f64,
    smear_tower_center: bool,

    particle_input: String,
    track_input: String,
    tower_output: String,
    photon_output: String,
    eflow_track_output: String,
    eflow_photon_output: String,
    eflow_neutral_hadron_output: String,
}

impl Default for Calorimeter {
    fn default() -> Self {
        Self {
            eta_bins: Vec::new(),
            phi_bins: Vec::new(),
            fractions: FractionMap::default(),
            ecal_resolution: ResolutionFormula::default(),
            hcal_resolution: ResolutionFormula::default(),
            ecal_energy_min: 0.0,
            hcal_energy_min: 0.0,
            ecal_significance_min: 0.0,
            hcal_significance_min: 0.0,
            smear_tower_center: true,
            particle_input: String::new(),
            track_input: String::new(),
            tower_output: String::new(),
            photon_output: String::new(),
            eflow_track_output: String::new(),
            eflow_photon_output: String::new(),
            eflow_neutral_hadron_output: String::new(),
        }
    }
}

impl Calorimeter {
    /// Creates a calorimeter with no configuration bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn init_impl(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        let (eta_bins, phi_bins) = read_eta_phi_bins(config);
        self.eta_bins = eta_bins;
        self.phi_bins = phi_bins;
        self.fractions = FractionMap::from_config(config, "EnergyFraction")?;

        self.ecal_resolution = ResolutionFormula::from_config(config, "ECal");
        self.hcal_resolution = ResolutionFormula::from_config(config, "HCal");
        self.ecal_energy_min = config.f64_or("ECalEnergyMin", 0.0);
        self.hcal_energy_min = config.f64_or("HCalEnergyMin", 0.0);
        self.ecal_significance_min = config.f64_or("ECalEnergySignificanceMin", 0.0);
        self.hcal_significance_min = config.f64_or("HCalEnergySignificanceMin", 0.0);
        self.smear_tower_center = config.bool_or("SmearTowerCenter", true);

        self.particle_input = config.str_or("ParticleInputArray", "particles").to_string();
        self.track_input = config.str_or("TrackInputArray", "tracks").to_string();
        self.tower_output = config.str_or("TowerOutputArray", "towers").to_string();
        self.photon_output = config.str_or("PhotonOutputArray", "photons").to_string();
        self.eflow_track_output = config.str_or("EFlowTrackOutputArray", "eflowTracks").to_string();
        self.eflow_photon_output = config.str_or("EFlowPhotonOutputArray", "eflowPhotons").to_string();
        self.eflow_neutral_hadron_output = config
            .str_or("EFlowNeutralHadronOutputArray", "eflowNeutralHadrons")
            .to_string();

        let _ = store.resolve(&config.name, &self.particle_input)?;
        let _ = store.resolve(&config.name, &self.track_input)?;
        store.declare(&self.tower_output);
        store.declare(&self.photon_output);
        store.declare(&self.eflow_track_output);
        store.declare(&self.eflow_photon_output);
        store.declare(&self.eflow_neutral_hadron_output);
        Ok(())
    }

    fn find_bin(&self, eta: f64, phi: f64) -> Option<(usize, usize)> {
        let eta_bin = lower_bound_interior(&self.eta_bins, eta)?;
        let phi_bins = &self.phi_bins[eta_bin].phi_edges;
        let phi_bin = lower_bound_interior(phi_bins, phi)?;
        Some((eta_bin, phi_bin))
    }

    fn classify_hits(&self, store: &EventStore) -> Vec<Hit> {
        let mut hits = Vec::new();

        for &id in store.get(&self.particle_input).unwrap_or(&[]) {
            let particle = store.factory().get(id);
            let (ecal_frac, hcal_frac) = self.fractions.lookup(particle.pid.abs());
            if ecal_frac < 1.0e-9 && hcal_frac < 1.0e-9 {
                continue;
            }
            let eta = particle.position.eta();
            let phi = particle.position.phi();
            let Some((eta_bin, phi_bin)) = self.find_bin(eta, phi) else {
                continue;
            };
            let e = particle.momentum.t;
            hits.push(Hit {
                eta_bin,
                phi_bin,
                is_track: false,
                is_photon_like: is_electromagnetic(particle.pid.abs()),
                candidate: id,
                e_ecal: e * ecal_frac,
                e_hcal: e * hcal_frac,
            });
        }

        for &id in store.get(&self.track_input).unwrap_or(&[]) {
            let track = store.factory().get(id);
            let (ecal_frac, hcal_frac) = self.fractions.lookup(track.pid.abs());
            let eta = track.position.eta();
            let phi = track.position.phi();
            let Some((eta_bin, phi_bin)) = self.find_bin(eta, phi) else {
                continue;
            };
            let e = track.momentum.t;
            hits.push(Hit {
                eta_bin,
                phi_bin,
                is_track: true,
                is_photon_like: false,
                candidate: id,
                e_ecal: e * ecal_frac,
                e_hcal: e * hcal_frac,
            });
        }

        hits.sort_by_key(|h| (h.eta_bin, h.phi_bin, h.is_track));
        hits
    }

    fn accumulate_tower(&self, group: &[Hit], store: &EventStore) -> TowerAccumulator {
        let first = &group[0];
        let eta_edges = self.eta_bins[first.eta_bin - 1..=first.eta_bin]
            .iter()
            .copied()
            .collect_tuple()
            .unwrap();
        let phi_edges_vec = &self.phi_bins[first.eta_bin].phi_edges;
        let (phi_lo, phi_hi) = (phi_edges_vec[first.phi_bin - 1], phi_edges_vec[first.phi_bin]);
        let (eta_lo, eta_hi): (f64, f64) = eta_edges;

        let mut tower = TowerAccumulator {
            eta_center: 0.5 * (eta_lo + eta_hi),
            phi_center: 0.5 * (phi_lo + phi_hi),
            edges: (eta_lo, eta_hi, phi_lo, phi_hi),
            ..TowerAccumulator::default()
        };

        for hit in group {
            let candidate = store.factory().get(hit.candidate);
            let time = candidate.position.t;
            let w_ecal = hit.e_ecal.max(0.0).sqrt();
            let w_hcal = hit.e_hcal.max(0.0).sqrt();

            if hit.is_track {
                tower.track_e_ecal += hit.e_ecal;
                tower.track_e_hcal += hit.e_hcal;
                tower.tower_e_ecal += hit.e_ecal;
                tower.tower_e_hcal += hit.e_hcal;
                tower.tower_time_ecal += w_ecal * time;
                tower.tower_time_hcal += w_hcal * time;
                tower.tower_time_weight_ecal += w_ecal;
                tower.tower_time_weight_hcal += w_hcal;
                tower.track_hits.push(hit.candidate);
            } else {
                if hit.is_photon_like {
                    tower.photon_hits += 1;
                }
                tower.tower_e_ecal += hit.e_ecal;
                tower.tower_e_hcal += hit.e_hcal;
                tower.tower_time_ecal += w_ecal * time;
                tower.tower_time_hcal += w_hcal * time;
                tower.tower_time_weight_ecal += w_ecal;
                tower.tower_time_weight_hcal += w_hcal;
                tower.members.push(hit.candidate);
            }
        }
        tower
    }

    fn finalize_tower(&self, tower: TowerAccumulator, store: &mut EventStore, rng: &mut StreamRng) {
        let mut ecal_sigma = self.ecal_resolution.sigma(tower.tower_e_ecal);
        let mut hcal_sigma = self.hcal_resolution.sigma(tower.tower_e_hcal);

        let mut ecal_energy = rng.log_normal_mean_sigma(tower.tower_e_ecal, ecal_sigma);
        let mut hcal_energy = rng.log_normal_mean_sigma(tower.tower_e_hcal, hcal_sigma);

        let ecal_time = if tower.tower_time_weight_ecal < 1.0e-9 {
            0.0
        } else {
            tower.tower_time_ecal / tower.tower_time_weight_ecal
        };
        let hcal_time = if tower.tower_time_weight_hcal < 1.0e-9 {
            0.0
        } else {
            tower.tower_time_hcal / tower.tower_time_weight_hcal
        };

        ecal_sigma = self.ecal_resolution.sigma(ecal_energy);
        hcal_sigma = self.hcal_resolution.sigma(hcal_energy);
        if ecal_energy < self.ecal_energy_min || ecal_energy < self.ecal_significance_min * ecal_sigma {
            ecal_energy = 0.0;
        }
        if hcal_energy < self.hcal_energy_min || hcal_energy < self.hcal_significance_min * hcal_sigma {
            hcal_energy = 0.0;
        }

        let energy = ecal_energy + hcal_energy;
        let w_ecal = ecal_energy.max(0.0).sqrt();
        let w_hcal = hcal_energy.max(0.0).sqrt();
        let time = if w_ecal + w_hcal < 1.0e-9 {
            0.0
        } else {
            (w_ecal * ecal_time + w_hcal * hcal_time) / (w_ecal + w_hcal)
        };

        let (eta, phi) = if self.smear_tower_center {
            (
                rng.uniform_range(tower.edges.0, tower.edges.1),
                rng.uniform_range(tower.edges.2, tower.edges.3),
            )
        } else {
            (tower.eta_center, tower.phi_center)
        };

        if energy <= 0.0 {
            return;
        }

        let factory = store.factory_mut();
        let tower_id = factory.new_candidate();
        {
            let t = factory.get_mut(tower_id);
            t.position = crate::four_vector::FourVector::from_pt_eta_phi_e(1.0, eta, phi, time);
            t.momentum = crate::four_vector::FourVector::from_pt_eta_phi_e(energy / eta.cosh(), eta, phi, energy);
            t.e_em = ecal_energy;
            t.e_had = hcal_energy;
            t.tower_edges = tower.edges;
            t.children = tower.members.clone();
        }

        let is_cal_photon = tower.track_hits.is_empty() && tower.photon_hits > 0;

        let (mut residual_ecal, mut residual_hcal) = (ecal_energy, hcal_energy);
        if !tower.track_hits.is_empty() {
            for &track_id in &tower.track_hits {
                store.push(&self.eflow_track_output, track_id);
            }
            residual_ecal = (ecal_energy - tower.track_e_ecal).max(0.0);
            residual_hcal = (hcal_energy - tower.track_e_hcal).max(0.0);
            let ecal_sig2 = self.ecal_resolution.sigma(residual_ecal);
            let hcal_sig2 = self.hcal_resolution.sigma(residual_hcal);
            if residual_ecal < self.ecal_energy_min || residual_ecal < self.ecal_significance_min * ecal_sig2 {
                residual_ecal = 0.0;
            }
            if residual_hcal < self.hcal_energy_min || residual_hcal < self.hcal_significance_min * hcal_sig2 {
                residual_hcal = 0.0;
            }
        }

        if !is_cal_photon {
            store.push(&self.tower_output, tower_id);
        }

        if residual_ecal > 0.0 {
            let photon_id = store.factory_mut().clone_candidate(tower_id);
            let p = store.factory_mut().get_mut(photon_id);
            p.momentum = crate::four_vector::FourVector::from_pt_eta_phi_e(residual_ecal / eta.cosh(), eta, phi, residual_ecal);
            p.e_em = residual_ecal;
            p.e_had = 0.0;
            store.push(&self.eflow_photon_output, photon_id);
            if is_cal_photon {
                store.push(&self.photon_output, photon_id);
            }
        }

        if residual_hcal > 0.0 {
            let neutral_id = store.factory_mut().clone_candidate(tower_id);
            let n = store.factory_mut().get_mut(neutral_id);
            n.momentum = crate::four_vector::FourVector::from_pt_eta_phi_e(residual_hcal / eta.cosh(), eta, phi, residual_hcal);
            n.e_em = 0.0;
            n.e_had = residual_hcal;
            store.push(&self.eflow_neutral_hadron_output, neutral_id);
            if is_cal_photon {
                store.push(&self.tower_output, neutral_id);
            }
        }
    }

    fn process_impl(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        let hits = self.classify_hits(store);
        for group in &hits.into_iter().group_by(|h| (h.eta_bin, h.phi_bin)) {
            let group: Vec<Hit> = group.1.collect();
            let tower = self.accumulate_tower(&group, store);
            self.finalize_tower(tower, store, rng);
        }
    }
}

/// Parses the `EtaPhiBins` parameter: a flat list of `(etaEdges, phiEdges)` group pairs. Every
/// `eta` in a group's `etaEdges` gets every `phi` in that group's `phiEdges` merged into its
/// entry, exactly as the source detector's `eta -> set<phi>` bin map is built, then the merged
/// map is split into parallel `(eta_bins, phi_bins)` vectors for fast lookup.
fn read_eta_phi_bins(config: &ModuleConfig) -> (Vec<f64>, Vec<EtaBin>) {
    let groups = config.params.get("EtaPhiBins").and_then(|v| match v {
        crate::config::ParamValue::Array(entries) => Some(entries),
        _ => None,
    });

    let mut bin_map: Vec<(f64, Vec<f64>)> = Vec::new();
    if let Some(entries) = groups {
        for pair in entries.chunks(2) {
            let [eta_edges, phi_edges] = pair else { continue };
            let etas = as_f64_array(eta_edges);
            let phis = as_f64_array(phi_edges);
            for eta in etas {
                let entry = match bin_map.iter_mut().find(|(e, _)| *e == eta) {
                    Some(entry) => entry,
                    None => {
                        bin_map.push((eta, Vec::new()));
                        bin_map.last_mut().unwrap()
                    }
                };
                for &phi in &phis {
                    if !entry.1.iter().any(|&p| p == phi) {
                        entry.1.push(phi);
                    }
                }
            }
        }
    }

    bin_map.sort_by(|a, b| a.0.total_cmp(&b.0));
    for (_, phis) in &mut bin_map {
        phis.sort_by(f64::total_cmp);
    }

    let eta_bins = bin_map.iter().map(|(e, _)| *e).collect();
    let phi_bins = bin_map
        .into_iter()
        .map(|(_, phi_edges)| EtaBin { phi_edges })
        .collect();
    (eta_bins, phi_bins)
}

fn as_f64_array(value: &crate::config::ParamValue) -> Vec<f64> {
    match value {
        crate::config::ParamValue::Array(vs) => vs.iter().filter_map(as_f64).collect(),
        _ => Vec::new(),
    }
}

/// `lower_bound` restricted to the interior `[1, edges.len()-1]` range (matches the original
/// detector's "discard particles outside the outermost edges" bin-lookup semantics).
fn lower_bound_interior(edges: &[f64], value: f64) -> Option<usize> {
    if edges.len() < 2 {
        return None;
    }
    let idx = edges.partition_point(|&e| e < value);
    if idx == 0 || idx == edges.len() {
        None
    } else {
        Some(idx)
    }
}

impl Module for Calorimeter {
    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.init_impl(config, store)
    }

    fn process(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        self.process_impl(store, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;
    use crate::four_vector::FourVector;

    fn simple_config() -> ModuleConfig {
        let eta_edges = ParamValue::Array(vec![
            ParamValue::Double(-1.0),
            ParamValue::Double(0.0),
            ParamValue::Double(1.0),
        ]);
        let phi_edges = ParamValue::Array(vec![
            ParamValue::Double(-3.0),
            ParamValue::Double(0.0),
            ParamValue::Double(3.0),
        ]);
        ModuleConfig::new("calo")
            .with("EtaPhiBins", ParamValue::Array(vec![eta_edges, phi_edges]))
            .with("SmearTowerCenter", ParamValue::Bool(false))
    }

    #[test]
    fn photon_with_no_tracks_becomes_tower_and_photon() {
        let mut store = EventStore::new();
        store.declare("particles");
        store.declare("tracks");
        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.pid = 22;
            c.momentum = FourVector::new(0.0, 0.0, 0.0, 10.0);
            c.position = FourVector::from_pt_eta_phi_e(1.0, 0.5, 1.0, 0.0);
        }
        store.push("particles", id);

        let mut calo = Calorimeter::new();
        let config = simple_config().with(
            "EnergyFraction",
            ParamValue::Array(vec![ParamValue::Int(22), ParamValue::Array(vec![
                ParamValue::Double(1.0),
                ParamValue::Double(0.0),
            ])]),
        );
        calo.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        calo.process(&mut store, &mut rng);

        assert!(!store.get("photons").unwrap().is_empty());
    }

    #[test]
    fn out_of_range_eta_is_dropped() {
        let mut store = EventStore::new();
        store.declare("particles");
        store.declare("tracks");
        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.pid = 22;
            c.momentum = FourVector::new(0.0, 0.0, 0.0, 10.0);
            c.position = FourVector::from_pt_eta_phi_e(1.0, 5.0, 1.0, 0.0);
        }
        store.push("particles", id);

        let mut calo = Calorimeter::new();
        let config = simple_config();
        calo.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        calo.process(&mut store, &mut rng);

        assert!(store.get("towers").unwrap().is_empty());
    }
}
