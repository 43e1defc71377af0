//! Helical/straight-line transport of stable particles to the calorimeter surface.

use crate::candidate::{CandidateId, Factory};
use crate::config::ModuleConfig;
use crate::error::Result;
use crate::event::EventStore;
use crate::four_vector::FourVector;
use crate::pdg::{C_LIGHT_MM_PER_NS, ELECTRON, MUON};
use crate::rng::StreamRng;

/// Vacuum speed of light in meters per second, used only inside this module's internal
/// meters/seconds working frame before converting back to the crate's mm/ns convention.
const C_LIGHT_M_PER_S: f64 = 2.99792458e8;

/// Transports particles from their production vertex to a cylinder of radius `Radius` and
/// half-length `HalfLength`, centered at the origin with axis along `z`, in a uniform axial
/// field `Bz`.
pub struct ParticlePropagator {
    radius_m: f64,
    radius2_m2: f64,
    half_length_m: f64,
    bz_tesla: f64,
    radius_max_m: f64,
    half_length_max_m: f64,

    input: String,
    beam_spot_input: Option<String>,
    output: String,
    neutral_output: String,
    charged_hadron_output: String,
    electron_output: String,
    muon_output: String,
}

impl Default for ParticlePropagator {
    fn default() -> Self {
        Self {
            radius_m: 1.0,
            radius2_m2: 1.0,
            half_length_m: 3.0,
            bz_tesla: 0.0,
            radius_max_m: 1.0,
            half_length_max_m: 3.0,
            input: String::new(),
            beam_spot_input: None,
            output: String::new(),
            neutral_output: String::new(),
            charged_hadron_output: String::new(),
            electron_output: String::new(),
            muon_output: String::new(),
        }
    }
}

impl ParticlePropagator {
    /// Creates a propagator with no configuration bound yet; call [`Self::init`] before use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.radius_m = config.f64_or("Radius", 1.0);
        self.radius2_m2 = self.radius_m * self.radius_m;
        self.half_length_m = config.f64_or("HalfLength", 3.0);
        self.bz_tesla = config.f64_or("Bz", 0.0);
        self.radius_max_m = config.f64_or("RadiusMax", self.radius_m);
        self.half_length_max_m = config.f64_or("HalfLengthMax", self.half_length_m);

        self.input = config.str_or("InputArray", "stableParticles").to_string();
        self.beam_spot_input = config.params.get("BeamSpotInputArray").map(|_| {
            config.str_or("BeamSpotInputArray", "beamSpotParticle").to_string()
        });
        self.output = config.str_or("OutputArray", "stableParticles").to_string();
        self.neutral_output = config.str_or("NeutralOutputArray", "neutralParticles").to_string();
        self.charged_hadron_output = config
            .str_or("ChargedHadronOutputArray", "chargedHadrons")
            .to_string();
        self.electron_output = config.str_or("ElectronOutputArray", "electrons").to_string();
        self.muon_output = config.str_or("MuonOutputArray", "muons").to_string();

        let _ = store.resolve(&config.name, &self.input)?;
        if let Some(name) = &self.beam_spot_input {
            let _ = store.resolve(&config.name, name)?;
        }
        store.declare(&self.output);
        store.declare(&self.neutral_output);
        store.declare(&self.charged_hadron_output);
        store.declare(&self.electron_output);
        store.declare(&self.muon_output);
        Ok(())
    }

    fn process(&mut self, store: &mut EventStore, _rng: &mut StreamRng) {
        let inputs = store.get(&self.input).unwrap_or(&[]).to_vec();
        let beam_spot = self
            .beam_spot_input
            .as_ref()
            .and_then(|name| store.get(name))
            .and_then(|ids| ids.first().copied())
            .map(|id| store.factory().get(id).position)
            .unwrap_or_else(FourVector::zero);

        for particle_id in inputs {
            self.process_one(particle_id, beam_spot, store);
        }
    }

    fn process_one(&self, particle_id: CandidateId, beam_spot: FourVector, store: &mut EventStore) {
        let factory = store.factory_mut();
        let particle = factory.get(particle_id).clone();

        let x0 = particle.position.x * 1.0e-3;
        let y0 = particle.position.y * 1.0e-3;
        let z0 = particle.position.z * 1.0e-3;
        let bsx = beam_spot.x * 1.0e-3;
        let bsy = beam_spot.y * 1.0e-3;
        let bsz = beam_spot.z * 1.0e-3;

        if x0.hypot(y0) > self.radius_max_m || z0.abs() > self.half_length_max_m {
            let passthrough = self.clone_passthrough(factory, particle_id, &particle);
            store.push(&self.output, passthrough);
            self.classify(store, passthrough, &particle);
            return;
        }

        let px = particle.momentum.x;
        let py = particle.momentum.y;
        let pz = particle.momentum.z;
        let pt2 = particle.momentum.pt2();
        let e = particle.momentum.t;
        if pt2 < 1.0e-9 {
            return;
        }

        if x0.hypot(y0) > self.radius_m || z0.abs() > self.half_length_m {
            let passthrough = self.clone_passthrough(factory, particle_id, &particle);
            store.push(&self.output, passthrough);
            self.classify(store, passthrough, &particle);
            return;
        }

        let q = f64::from(particle.charge);
        let output_id = if q.abs() < 1.0e-9 || self.bz_tesla.abs() < 1.0e-9 {
            self.straight_line(factory, particle_id, &particle, x0, y0, z0, px, py, pz, pt2, e)
        } else {
            self.helix(
                factory, particle_id, &particle, x0, y0, z0, px, py, pz, pt2, e, q, bsx, bsy, bsz,
            )
        };

        if let Some(id) = output_id {
            store.push(&self.output, id);
            let produced = store.factory().get(id).clone();
            self.classify(store, id, &produced);
        }
    }

    fn clone_passthrough(
        &self,
        factory: &mut Factory,
        particle_id: CandidateId,
        particle: &crate::candidate::Candidate,
    ) -> CandidateId {
        let id = factory.clone_candidate(particle_id);
        let out = factory.get_mut(id);
        out.initial_position = particle.position;
        out.position = particle.position;
        out.path_length = 0.0;
        out.momentum = particle.momentum;
        out.children = vec![particle_id];
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn straight_line(
        &self,
        factory: &mut Factory,
        particle_id: CandidateId,
        particle: &crate::candidate::Candidate,
        x: f64,
        y: f64,
        z: f64,
        px: f64,
        py: f64,
        pz: f64,
        pt2: f64,
        e: f64,
    ) -> Option<CandidateId> {
        let tmp = px * y - py * x;
        let radical = pt2 * self.radius2_m2 - tmp * tmp;
        if radical < 0.0 {
            return None;
        }
        let t_r = (radical.sqrt() - px * x - py * y) / pt2;
        let t_z = (self.half_length_m.copysign(pz) - z) / pz;
        let t = t_r.min(t_z);

        let x_t = x + px * t;
        let y_t = y + py * t;
        let z_t = z + pz * t;
        let l_m = ((x_t - x).powi(2) + (y_t - y).powi(2) + (z_t - z).powi(2)).sqrt();

        let p_mag = particle.momentum.p();
        let delta_t_ns = flight_time_ns(l_m, e, p_mag);

        let id = factory.clone_candidate(particle_id);
        let out = factory.get_mut(id);
        out.initial_position = particle.position;
        out.position = FourVector::new(
            x_t * 1.0e3,
            y_t * 1.0e3,
            z_t * 1.0e3,
            particle.position.t + delta_t_ns,
        );
        out.path_length = l_m * 1.0e3;
        out.momentum = particle.momentum;
        out.children = vec![particle_id];
        Some(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn helix(
        &self,
        factory: &mut Factory,
        particle_id: CandidateId,
        particle: &crate::candidate::Candidate,
        x: f64,
        y: f64,
        z: f64,
        px: f64,
        py: f64,
        pz: f64,
        pt2: f64,
        e: f64,
        q: f64,
        bsx: f64,
        bsy: f64,
        bsz: f64,
    ) -> Option<CandidateId> {
        let pt = pt2.sqrt();

        let gammam = e * 1.0e9 / (C_LIGHT_M_PER_S * C_LIGHT_M_PER_S);
        let omega = q * self.bz_tesla / gammam;
        let r = pt / (q * self.bz_tesla) * 1.0e9 / C_LIGHT_M_PER_S;

        let phi0 = py.atan2(px);

        let x_c = x + r * phi0.sin();
        let y_c = y - r * phi0.cos();
        let r_c = x_c.hypot(y_c);

        let mut td = (phi0 + x_c.atan2(y_c)) / omega;
        let pio = (std::f64::consts::PI / omega).abs();
        while td.abs() > 0.5 * pio {
            td -= td.signum() * pio;
        }

        let vz = pz * C_LIGHT_M_PER_S / e;

        let phid = phi0 - omega * td;
        let xd = x_c - r * phid.sin();
        let yd = y_c + r * phid.cos();
        let zd = z + vz * td;

        let px_ca = pt * phid.cos();
        let py_ca = pt * phid.sin();
        let eta = particle.momentum.eta();
        let ca_momentum = FourVector::from_pt_eta_phi_e(pt, eta, phid, e);

        let d0 = ((xd - bsx) * py_ca - (yd - bsy) * px_ca) / pt;
        let dz = zd - bsz;
        let ctg_theta = ca_momentum.ctg_theta();

        let t_z = if vz == 0.0 {
            1.0e99
        } else {
            (self.half_length_m.copysign(pz) - z) / vz
        };

        let t = if r_c + r.abs() < self.radius_m {
            t_z
        } else {
            let cos_alpha = ((r * r + r_c * r_c - self.radius2_m2) / (2.0 * r.abs() * r_c)).clamp(-1.0, 1.0);
            let alpha = cos_alpha.acos();
            let t_r = td + (alpha / omega).abs();
            t_r.min(t_z)
        };

        let phi_t = phi0 - omega * t;
        let x_t = x_c - r * phi_t.sin();
        let y_t = y_c + r * phi_t.cos();
        let z_t = z + vz * t;
        let r_t = x_t.hypot(y_t);

        let l_m = t.abs() * vz.hypot(r * omega);

        if r_t <= 0.0 {
            return None;
        }

        let p_mag = pt.hypot(ca_momentum.z);
        let delta_t_ns = flight_time_ns(l_m, e, p_mag);

        let id = factory.clone_candidate(particle_id);
        let out = factory.get_mut(id);
        out.initial_position = particle.position;
        out.position = FourVector::new(
            x_t * 1.0e3,
            y_t * 1.0e3,
            z_t * 1.0e3,
            particle.position.t + delta_t_ns,
        );
        out.momentum = ca_momentum;
        out.path_length = l_m * 1.0e3;
        out.closest_approach = (xd * 1.0e3, yd * 1.0e3, zd * 1.0e3);
        out.helix.d0 = d0 * 1.0e3;
        out.helix.dz = dz * 1.0e3;
        out.helix.p = ca_momentum.p();
        out.helix.pt = pt;
        out.helix.ctg_theta = ctg_theta;
        out.helix.phi = ca_momentum.phi();
        out.children = vec![particle_id];
        Some(id)
    }

    fn classify(&self, store: &mut EventStore, id: CandidateId, particle: &crate::candidate::Candidate) {
        if particle.charge == 0 {
            store.push(&self.neutral_output, id);
            return;
        }
        match particle.pid.abs() {
            ELECTRON => store.push(&self.electron_output, id),
            MUON => store.push(&self.muon_output, id),
            _ => store.push(&self.charged_hadron_output, id),
        }
    }
}

impl crate::module::Module for ParticlePropagator {
    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        ParticlePropagator::init(self, config, store)
    }

    fn process(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        ParticlePropagator::process(self, store, rng)
    }
}

/// Time to traverse a path of length `l_m` meters for a particle of energy `e_gev` and momentum
/// magnitude `p_gev`, expressed in nanoseconds.
///
/// Since the magnetic force does no work, speed `|v| = p*c/E` is constant along both the
/// straight-line and helical branches, so this single formula covers both: `l_mm * E / p` is
/// `c * t_flight` in millimeters, which this converts to nanoseconds via
/// [`C_LIGHT_MM_PER_NS`].
pub(crate) fn flight_time_ns(l_m: f64, e_gev: f64, p_gev: f64) -> f64 {
    let l_mm = l_m * 1.0e3;
    (l_mm * e_gev / p_gev) / C_LIGHT_MM_PER_NS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;

    fn setup_store(input: &str) -> EventStore {
        let mut store = EventStore::new();
        store.declare(input);
        store
    }

    #[test]
    fn neutral_straight_line_reaches_radius() {
        let mut store = setup_store("stableParticles");
        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.charge = 0;
            c.momentum = FourVector::new(10.0, 0.0, 0.0, 10.0);
            c.position = FourVector::zero();
        }
        store.push("stableParticles", id);

        let mut module = ParticlePropagator::new();
        let config = ModuleConfig::new("prop")
            .with("Radius", ParamValue::Double(1.0))
            .with("HalfLength", ParamValue::Double(3.0));
        module.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        module.process(&mut store, &mut rng);

        let out = store.get("stableParticles").unwrap();
        assert_eq!(out.len(), 1);
        let produced = store.factory().get(out[0]);
        assert!((produced.position.x - 1000.0).abs() < 1.0e-6);
        assert!(produced.path_length > 0.0);
    }

    #[test]
    fn below_pt_floor_is_dropped() {
        let mut store = setup_store("stableParticles");
        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.charge = 0;
            c.momentum = FourVector::new(1.0e-6, 0.0, 1.0, 1.0);
        }
        store.push("stableParticles", id);

        let mut module = ParticlePropagator::new();
        let config = ModuleConfig::new("prop");
        module.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        module.process(&mut store, &mut rng);

        assert!(store.get("stableParticles").unwrap().is_empty());
    }

    #[test]
    fn outside_max_radius_passes_through_unchanged() {
        let mut store = setup_store("stableParticles");
        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.charge = 0;
            c.momentum = FourVector::new(1.0, 0.0, 0.0, 1.0);
            c.position = FourVector::new(5000.0, 0.0, 0.0, 0.0);
        }
        store.push("stableParticles", id);

        let mut module = ParticlePropagator::new();
        let config = ModuleConfig::new("prop")
            .with("Radius", ParamValue::Double(1.0))
            .with("HalfLength", ParamValue::Double(3.0));
        module.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        module.process(&mut store, &mut rng);

        let out = store.get("stableParticles").unwrap();
        let produced = store.factory().get(out[0]);
        assert!((produced.position.x - 5000.0).abs() < 1.0e-6);
        assert_eq!(produced.path_length, 0.0);
    }

    #[test]
    fn charged_particle_in_field_follows_helix_and_fills_track_params() {
        let mut store = setup_store("stableParticles");
        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.charge = -1;
            c.pid = 211;
            c.momentum = FourVector::new(2.0, 0.0, 1.0, (2.0f64 * 2.0 + 1.0).sqrt());
            c.position = FourVector::zero();
        }
        store.push("stableParticles", id);

        let mut module = ParticlePropagator::new();
        let config = ModuleConfig::new("prop")
            .with("Radius", ParamValue::Double(1.29))
            .with("HalfLength", ParamValue::Double(3.0))
            .with("Bz", ParamValue::Double(3.8));
        module.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        module.process(&mut store, &mut rng);

        let out = store.get("stableParticles").unwrap();
        assert_eq!(out.len(), 1);
        let produced = store.factory().get(out[0]);
        assert!(produced.helix.pt > 0.0);
        assert!(produced.path_length > 0.0);

        let charged_hadrons = store.get("chargedHadrons").unwrap();
        assert_eq!(charged_hadrons.len(), 1);
    }
}
