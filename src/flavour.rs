//! Parton-flavour association for jets by proximity in `(eta, phi)`.

use crate::candidate::CandidateId;
use crate::config::ModuleConfig;
use crate::error::Result;
use crate::event::EventStore;
use crate::four_vector::delta_r;
use crate::module::Module;
use crate::pdg::GLUON;
use crate::rng::StreamRng;

/// Assigns each jet a flavour by several competing conventions, all computed from partons found
/// within a cone of the jet axis: the heaviest in-cone parton, the highest-pT in-cone parton, the
/// nearest-in-DeltaR parton, an "algorithmic" flavour (the heaviest parton in cone, gluon treated
/// as flavour 0, matching the standard jet-parton matching convention), and a "physics" flavour
/// that requires a single, unique in-cone hard-scatter parton (`status == 3`) — if more than one
/// such parton falls in the cone, the jet's physics flavour is left unassigned rather than
/// guessed at, since the original record can no longer tell which one the jet actually came from.
pub struct FlavourAssociation {
    delta_r: f64,
    parton_pt_min: f64,
    parton_eta_max: f64,
    parton_input: String,
    jet_input: String,
}

impl Default for FlavourAssociation {
    fn default() -> Self {
        Self {
            delta_r: 0.5,
            parton_pt_min: 0.0,
            parton_eta_max: 2.5,
            parton_input: String::new(),
            jet_input: String::new(),
        }
    }
}

impl FlavourAssociation {
    /// Creates a flavour-association module with no configuration bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn init_impl(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.delta_r = config.f64_or("DeltaR", 0.5);
        self.parton_pt_min = config.f64_or("PartonPTMin", 0.0);
        self.parton_eta_max = config.f64_or("PartonEtaMax", 2.5);
        self.parton_input = config.str_or("PartonInputArray", "partons").to_string();
        self.jet_input = config.str_or("JetInputArray", "jets").to_string();

        let _ = store.resolve(&config.name, &self.parton_input)?;
        let _ = store.resolve(&config.name, &self.jet_input)?;
        Ok(())
    }

    fn eligible_partons(&self, store: &EventStore) -> Vec<CandidateId> {
        store
            .get(&self.parton_input)
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(|&id| {
                let p = store.factory().get(id);
                if p.status == -1 {
                    return false;
                }
                let pt_ok = p.momentum.pt() > self.parton_pt_min;
                let eta_ok = p.momentum.eta().abs() <= self.parton_eta_max;
                let pid = p.pid.unsigned_abs();
                let is_parton = pid == GLUON as u32 || pid <= 5;
                pt_ok && eta_ok && is_parton
            })
            .collect()
    }

    fn process_impl(&mut self, store: &mut EventStore, _rng: &mut StreamRng) {
        let partons = self.eligible_partons(store);
        let jets: Vec<CandidateId> = store.get(&self.jet_input).unwrap_or(&[]).to_vec();

        for &jet_id in &jets {
            let jet_momentum = store.factory().get(jet_id).momentum;
            let jet_eta = jet_momentum.eta();
            let jet_phi = jet_momentum.phi();

            let (mut heaviest, mut highest_pt, mut nearest) = (0i32, 0i32, 0i32);
            let (mut best_pt, mut best_dr) = (0.0, f64::MAX);
            let mut algo_code = -1i32;
            let (mut hard_scatter_pid, mut hard_scatter_count) = (0i32, 0u32);

            for &p_id in &partons {
                let parton = store.factory().get(p_id);
                let dr = delta_r(jet_eta, jet_phi, parton.momentum.eta(), parton.momentum.phi());
                if dr > self.delta_r {
                    continue;
                }

                let abs_pid = parton.pid.abs();
                if abs_pid > heaviest.abs() {
                    heaviest = parton.pid;
                }
                let pt = parton.momentum.pt();
                if pt > best_pt {
                    best_pt = pt;
                    highest_pt = parton.pid;
                }
                if dr < best_dr {
                    best_dr = dr;
                    nearest = parton.pid;
                }

                let algo_pid = if abs_pid == GLUON { 0 } else { abs_pid };
                if algo_pid > algo_code {
                    algo_code = algo_pid;
                }
                if parton.status == 3 {
                    hard_scatter_count += 1;
                    hard_scatter_pid = algo_pid;
                }
            }

            // A jet's physics flavour is only well-defined when exactly one hard-scatter parton
            // falls in its cone; two or more is contamination, and the jet is left unflavoured.
            let phys_code = if hard_scatter_count == 1 { hard_scatter_pid } else { -1 };

            let jet = store.factory_mut().get_mut(jet_id);
            jet.flavor_heaviest = heaviest;
            jet.flavor_highest_pt = highest_pt;
            jet.flavor_nearest = nearest;
            jet.flavor_algo = algo_code.max(0);
            jet.flavor_phys = phys_code.max(0);
        }
    }
}

impl Module for FlavourAssociation {
    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.init_impl(config, store)
    }

    fn process(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        self.process_impl(store, rng);
    }
}
