//! Isolation-cone sum computation and pile-up correction.

use std::f64::consts::PI;

use rayon::prelude::*;

use crate::candidate::CandidateId;
use crate::config::ModuleConfig;
use crate::error::Result;
use crate::event::EventStore;
use crate::four_vector::delta_r;
use crate::module::Module;
use crate::rng::StreamRng;

/// Per-candidate cone-sum outcome, computed independently of every other candidate.
struct ConeSums {
    isolation_var: f64,
    sum_charged: f64,
    sum_neutral: f64,
    sum_charged_pu: f64,
    passes: bool,
}

/// Sums transverse momenta of isolation objects in a cone around each candidate and keeps only
/// candidates whose pile-up-corrected isolation ratio (or sum) passes a cut.
pub struct Isolation {
    delta_r_max: f64,
    delta_r_min: f64,
    use_mini_cone: bool,
    pt_ratio_max: f64,
    pt_sum_max: f64,
    use_pt_sum: bool,
    use_rho_correction: bool,
    pt_min: f64,
    isolation_input: String,
    candidate_input: String,
    rho_input: Option<String>,
    output: String,
}

impl Default for Isolation {
    fn default() -> Self {
        Self {
            delta_r_max: 0.5,
            delta_r_min: 0.01,
            use_mini_cone: false,
            pt_ratio_max: 0.1,
            pt_sum_max: 5.0,
            use_pt_sum: false,
            use_rho_correction: true,
            pt_min: 0.5,
            isolation_input: String::new(),
            candidate_input: String::new(),
            rho_input: None,
            output: String::new(),
        }
    }
}

impl Isolation {
    /// Creates an isolation module with no configuration bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn init_impl(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.delta_r_max = config.f64_or("DeltaRMax", 0.5);
        self.delta_r_min = config.f64_or("DeltaRMin", 0.01);
        self.use_mini_cone = config.bool_or("UseMiniCone", false);
        self.pt_ratio_max = config.f64_or("PTRatioMax", 0.1);
        self.pt_sum_max = config.f64_or("PTSumMax", 5.0);
        self.use_pt_sum = config.bool_or("UsePTSum", false);
        self.use_rho_correction = config.bool_or("UseRhoCorrection", true);
        self.pt_min = config.f64_or("PTMin", 0.5);

        self.isolation_input = config.str_or("IsolationInputArray", "partons").to_string();
        self.candidate_input = config.str_or("CandidateInputArray", "electrons").to_string();
        self.output = config.str_or("OutputArray", "electrons").to_string();
        let rho_input = config.str_or("RhoInputArray", "");
        self.rho_input = if rho_input.is_empty() { None } else { Some(rho_input.to_string()) };

        let _ = store.resolve(&config.name, &self.isolation_input)?;
        let _ = store.resolve(&config.name, &self.candidate_input)?;
        if let Some(rho) = &self.rho_input {
            let _ = store.resolve(&config.name, rho)?;
        }
        store.declare(&self.output);
        Ok(())
    }

    fn rho_for_eta(&self, store: &EventStore, eta: f64) -> f64 {
        let Some(rho_input) = &self.rho_input else { return 0.0 };
        let mut rho = 0.0;
        for &id in store.get(rho_input).unwrap_or(&[]) {
            let tower = store.factory().get(id);
            let (eta_lo, eta_hi, _, _) = tower.tower_edges;
            if eta >= eta_lo && eta < eta_hi {
                rho = tower.momentum.pt();
            }
        }
        rho
    }

    /// Computes the cone sums and isolation ratio for a single candidate against the full
    /// isolation-object list. Independent of every other candidate, so callers run this for the
    /// whole candidate list in parallel.
    fn cone_sums_for(&self, store: &EventStore, cand_id: CandidateId, isolation_ids: &[CandidateId]) -> ConeSums {
        let candidate_momentum = store.factory().get(cand_id).momentum;
        let eta = candidate_momentum.eta().abs();
        let rho = self.rho_for_eta(store, eta);

        let (mut sum_neutral, mut sum_charged_no_pu, mut sum_charged_pu) = (0.0, 0.0, 0.0);
        for &iso_id in isolation_ids {
            let iso = store.factory().get(iso_id);
            let dr = delta_r(candidate_momentum.eta(), candidate_momentum.phi(), iso.momentum.eta(), iso.momentum.phi());
            let pass = if self.use_mini_cone {
                dr <= self.delta_r_max && dr > self.delta_r_min
            } else {
                dr <= self.delta_r_max && iso_id != cand_id
            };
            if !pass {
                continue;
            }

            let pt = iso.momentum.pt();
            if iso.charge != 0 {
                if iso.is_reco_pileup {
                    sum_charged_pu += pt;
                } else {
                    sum_charged_no_pu += pt;
                }
            } else {
                sum_neutral += pt;
            }
        }

        let sum_dbeta = sum_charged_no_pu + (sum_neutral - 0.5 * sum_charged_pu).max(0.0);
        let sum_rho_corr =
            sum_charged_no_pu + (sum_neutral - rho.max(0.0) * self.delta_r_max * self.delta_r_max * PI).max(0.0);
        let pt = candidate_momentum.pt();
        let ratio_dbeta = sum_dbeta / pt;
        let ratio_rho_corr = sum_rho_corr / pt;

        let sum = if self.use_rho_correction { sum_rho_corr } else { sum_dbeta };
        let ratio = if self.use_rho_correction { ratio_rho_corr } else { ratio_dbeta };
        let passes = if self.use_pt_sum { sum <= self.pt_sum_max } else { ratio <= self.pt_ratio_max };

        ConeSums {
            isolation_var: ratio,
            sum_charged: sum_charged_no_pu,
            sum_neutral,
            sum_charged_pu,
            passes,
        }
    }

    fn process_impl(&mut self, store: &mut EventStore, _rng: &mut StreamRng) {
        let isolation_ids: Vec<CandidateId> = store
            .get(&self.isolation_input)
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(|&id| store.factory().get(id).momentum.pt() >= self.pt_min)
            .collect();

        let candidate_ids: Vec<CandidateId> = store.get(&self.candidate_input).unwrap_or(&[]).to_vec();

        let this: &Self = self;
        let store_ref: &EventStore = store;
        let sums: Vec<ConeSums> = candidate_ids
            .par_iter()
            .map(|&cand_id| this.cone_sums_for(store_ref, cand_id, &isolation_ids))
            .collect();

        for (&cand_id, result) in candidate_ids.iter().zip(sums) {
            let c = store.factory_mut().get_mut(cand_id);
            c.isolation_var = result.isolation_var;
            c.iso_sum_charged = result.sum_charged;
            c.iso_sum_neutral = result.sum_neutral;
            c.iso_sum_charged_pu = result.sum_charged_pu;

            if result.passes {
                store.push(&self.output, cand_id);
            }
        }
    }
}

impl Module for Isolation {
    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.init_impl(config, store)
    }

    fn process(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        self.process_impl(store, rng);
    }
}
