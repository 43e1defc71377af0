//! Deterministic-annealing primary-vertex finder operating in `(z, t)`.

use crate::candidate::CandidateId;
use crate::config::ModuleConfig;
use crate::error::Result;
use crate::event::EventStore;
use crate::four_vector::FourVector;
use crate::module::Module;
use crate::pdg::CHARGED_PION_MASS;
use crate::propagator::flight_time_ns;
use crate::rng::StreamRng;

/// Per-track feature vector consumed by the annealing loop: `(z, t)` and their inverse variances,
/// plus the outlier-rejection weight `pi` and a back-reference to the originating candidate.
struct TrackFeature {
    z: f64,
    t: f64,
    dz2_inv: f64,
    dt2_inv: f64,
    w: f64,
    candidate: CandidateId,
}

impl TrackFeature {
    fn dz_inv(&self) -> f64 {
        self.dz2_inv.sqrt()
    }

    fn dt_inv(&self) -> f64 {
        self.dt2_inv.sqrt()
    }
}

/// The mixture of vertex prototypes being annealed, plus each prototype's posterior `(z, t)`
/// covariance from the last `update`.
#[derive(Default)]
struct Vertices {
    z: Vec<f64>,
    t: Vec<f64>,
    pk: Vec<f64>,
    szz: Vec<f64>,
    stt: Vec<f64>,
    stz: Vec<f64>,
    /// `(beta, rho0)` the annealing schedule converged to; filled in by `clusterize` and consumed
    /// once by the caller to drive final track-to-vertex assignment.
    final_beta_rho0: Option<(f64, f64)>,
}

impl Vertices {
    fn len(&self) -> usize {
        self.z.len()
    }

    fn add(&mut self, z: f64, t: f64, pk: f64) {
        self.z.push(z);
        self.t.push(t);
        self.pk.push(pk);
        self.szz.push(0.0);
        self.stt.push(0.0);
        self.stz.push(0.0);
    }

    fn remove(&mut self, k: usize) {
        self.z.remove(k);
        self.t.remove(k);
        self.pk.remove(k);
        self.szz.remove(k);
        self.stt.remove(k);
        self.stz.remove(k);
    }

    fn distance2(&self, k1: usize, k2: usize, z_size: f64, t_size: f64) -> f64 {
        ((self.z[k1] - self.z[k2]) / z_size).powi(2) + ((self.t[k1] - self.t[k2]) / t_size).powi(2)
    }

    fn nearest(&self, t: f64, z: f64, z_size: f64, t_size: f64) -> usize {
        (0..self.len())
            .min_by(|&a, &b| {
                let da = ((z - self.z[a]) / z_size).powi(2) + ((t - self.t[a]) / t_size).powi(2);
                let db = ((z - self.z[b]) / z_size).powi(2) + ((t - self.t[b]) / t_size).powi(2);
                da.total_cmp(&db)
            })
            .unwrap_or(0)
    }

    /// Returns `(min beta_c, argmin index)` over all prototypes' critical temperatures, the
    /// largest eigenvalue of each prototype's posterior `(z, t)` covariance.
    fn min_beta_c(&self) -> Option<(f64, usize)> {
        (0..self.len())
            .map(|k| {
                let diff = self.szz[k] - self.stt[k];
                let disc = (diff * diff + 4.0 * self.stz[k] * self.stz[k]).max(0.0).sqrt();
                let beta_c = 1.0 / (self.szz[k] + self.stt[k] + disc);
                (beta_c, k)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

fn energy(tz: f64, vz: f64, dz2_inv: f64, tt: f64, vt: f64, dt2_inv: f64) -> f64 {
    (tz - vz).powi(2) * dz2_inv + (tt - vt).powi(2) * dt2_inv
}

/// Returns the Gibbs weight matrix (`k * nt + i` indexed) and, per track, the partition function
/// `Z_i` summed over all prototypes plus the outlier mass `z_init`.
fn compute_weights(beta: f64, vtx: &Vertices, tks: &[TrackFeature], z_init: f64) -> (Vec<f64>, Vec<f64>) {
    let nt = tks.len();
    let nv = vtx.len();
    let mut weights = vec![0.0; nt * nv];
    let mut z_partition = vec![z_init; nt];
    for k in 0..nv {
        for (i, track) in tks.iter().enumerate() {
            let e = energy(track.z, vtx.z[k], track.dz2_inv, track.t, vtx.t[k], track.dt2_inv);
            let w = vtx.pk[k] * (-beta * e).exp();
            z_partition[i] += w;
            weights[k * nt + i] = w;
        }
    }
    (weights, z_partition)
}

/// Configuration for the deterministic-annealing schedule, bound at `init`.
struct DaConfig {
    max_iterations: u32,
    beta_max: f64,
    beta_purge: f64,
    beta_stop: f64,
    vertex_z_size: f64,
    vertex_t_size: f64,
    cooling_factor: f64,
    dz_cutoff: f64,
    d0_cutoff: f64,
    dt_cutoff: f64,
    pt_min: f64,
    pt_max: f64,
    d2_update_lim: f64,
    d2_merge: f64,
    mu_outlier: f64,
    min_track_prob: f64,
    min_n_track: i64,
    track_time_resolution: f64,
}

impl DaConfig {
    fn from_config(config: &ModuleConfig) -> Self {
        let mut beta_max = config.f64_or("BetaMax", 1.5);
        let mut beta_purge = config.f64_or("BetaPurge", 1.0);
        let mut beta_stop = config.f64_or("BetaStop", 0.2);
        if beta_max < beta_purge {
            beta_purge = beta_max;
        }
        if beta_purge < beta_stop {
            beta_stop = beta_purge;
        }
        beta_max = beta_max.max(beta_purge).max(beta_stop);
        Self {
            max_iterations: config.i64_or("MaxIterations", 100) as u32,
            beta_max,
            beta_purge,
            beta_stop,
            vertex_z_size: config.f64_or("VertexZSize", 0.1),
            vertex_t_size: config.f64_or("VertexTSize", 0.015),
            cooling_factor: config.f64_or("CoolingFactor", 0.8),
            dz_cutoff: config.f64_or("DzCutOff", 40.0),
            d0_cutoff: config.f64_or("D0CutOff", 0.5),
            dt_cutoff: config.f64_or("DtCutOff", 0.16),
            pt_min: config.f64_or("PtMin", 0.5),
            pt_max: config.f64_or("PtMax", 50.0),
            d2_update_lim: config.f64_or("D2UpdateLim", 0.5),
            d2_merge: config.f64_or("D2Merge", 4.0),
            mu_outlier: config.f64_or("MuOutlayer", 4.0),
            min_track_prob: config.f64_or("MinTrackProb", 0.6),
            min_n_track: config.i64_or("MinNTrack", 10),
            track_time_resolution: config.f64_or("TrackTimeResolution", 0.03),
        }
    }
}

/// Partitions charged tracks into primary vertices in `(z, t)` by deterministic annealing.
pub struct VertexFinderDa4D {
    cfg: Option<DaConfig>,
    input: String,
    track_output: String,
    vertex_output: String,
}

impl Default for VertexFinderDa4D {
    fn default() -> Self {
        Self {
            cfg: None,
            input: String::new(),
            track_output: String::new(),
            vertex_output: String::new(),
        }
    }
}

impl VertexFinderDa4D {
    /// Creates a vertex finder with no configuration bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn init_impl(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.cfg = Some(DaConfig::from_config(config));
        self.input = config.str_or("InputArray", "tracks").to_string();
        self.track_output = config.str_or("TrackOutputArray", "tracks").to_string();
        self.vertex_output = config.str_or("VertexOutputArray", "vertices").to_string();

        let _ = store.resolve(&config.name, &self.input)?;
        store.declare(&self.track_output);
        store.declare(&self.vertex_output);
        Ok(())
    }

    fn build_tracks(&self, cfg: &DaConfig, store: &mut EventStore) -> (Vec<TrackFeature>, Vec<CandidateId>) {
        let mut tracks = Vec::new();
        let mut discarded = Vec::new();

        let ids: Vec<CandidateId> = store.get(&self.input).unwrap_or(&[]).to_vec();
        for id in ids {
            let c = store.factory().get(id);
            let pt = c.helix.pt;
            let mut discard = !(cfg.pt_min..=cfg.pt_max).contains(&pt);

            let z = c.helix.dz;
            if z.abs() > 3.0 * cfg.dz_cutoff {
                discard = true;
            }

            let p = pt * (1.0 + c.helix.ctg_theta * c.helix.ctg_theta).sqrt();
            let e = p.hypot(CHARGED_PION_MASS);
            let mut t = c.position.t;
            t -= flight_time_ns(c.path_length * 1.0e-3, e, p);
            if t.abs() > 3.0 * cfg.dt_cutoff {
                discard = true;
            }

            let dz2_inv = 1.0 / (c.helix.dz_error * c.helix.dz_error + cfg.vertex_z_size * cfg.vertex_z_size);
            let dt2_inv =
                1.0 / (cfg.track_time_resolution * cfg.track_time_resolution + cfg.vertex_t_size * cfg.vertex_t_size);

            let w = if cfg.d0_cutoff > 0.0 && c.helix.d0_error > 0.0 {
                let d0_sig = (c.helix.d0 / c.helix.d0_error).abs();
                let x = (d0_sig * d0_sig - cfg.d0_cutoff * cfg.d0_cutoff).exp();
                let w = 1.0 / (1.0 + x);
                if w < 1.0e-4 {
                    discard = true;
                }
                w
            } else {
                1.0
            };

            if discard {
                discarded.push(id);
                continue;
            }

            let c = store.factory_mut().get_mut(id);
            c.vertex_time = t;
            c.vertexing_weight = w;

            tracks.push(TrackFeature {
                z,
                t,
                dz2_inv,
                dt2_inv,
                w,
                candidate: id,
            });
        }
        (tracks, discarded)
    }

    #[allow(clippy::too_many_arguments)]
    fn beta0(&self, tracks: &[TrackFeature], vtx: &mut Vertices, sum_w: f64, sum_w_o_dz2: f64, sum_w_o_dt2: f64, cfg: &DaConfig) -> f64 {
        let (mut sum_wz, mut sum_wt) = (0.0, 0.0);
        for track in tracks {
            sum_wz += track.w * track.z * track.dz2_inv;
            sum_wt += track.w * track.t * track.dt2_inv;
        }
        vtx.z[0] = sum_wz / sum_w_o_dz2;
        vtx.t[0] = sum_wt / sum_w_o_dt2;

        let (mut s_zz, mut s_tt, mut s_tz) = (0.0, 0.0, 0.0);
        for track in tracks {
            let dz = (track.z - vtx.z[0]) * track.dz_inv();
            let dt = (track.t - vtx.t[0]) * track.dt_inv();
            s_zz += track.w * dz * dz;
            s_tt += track.w * dt * dt;
            s_tz += track.w * dt * dz;
        }
        s_zz /= sum_w;
        s_tt /= sum_w;
        s_tz /= sum_w;

        let disc = ((s_tt - s_zz).powi(2) + 4.0 * s_tz * s_tz).max(0.0).sqrt();
        let beta_c = 1.0 / (s_tt + s_zz + disc);
        if beta_c < cfg.beta_max {
            beta_c * cfg.cooling_factor.sqrt()
        } else {
            cfg.beta_max * cfg.cooling_factor
        }
    }

    /// One fixed-point iteration: recomputes prototype positions/masses/covariances. Returns the
    /// largest normalized squared displacement across prototypes.
    fn update(&self, beta: f64, tracks: &[TrackFeature], vtx: &mut Vertices, rho0: f64, cfg: &DaConfig) -> f64 {
        let nt = tracks.len();
        let z_init = rho0 * (-beta * cfg.mu_outlier * cfg.mu_outlier).exp();
        let (weights, z_partition) = compute_weights(beta, vtx, tracks, z_init);

        let mut delta2_max = 0.0;
        let mut sum_pk = 0.0;
        let mut k = 0;
        while k < vtx.len() {
            let (mut pk_new, mut sw_z, mut sw_t, mut sum_wz, mut sum_wt) = (0.0, 0.0, 0.0, 0.0, 0.0);
            let (mut szz, mut stt, mut stz) = (0.0, 0.0, 0.0);
            let (mut sum_pzz, mut sum_ptt, mut sum_ptz) = (0.0, 0.0, 0.0);

            for (i, track) in tracks.iter().enumerate() {
                let idx = k * nt + i;
                if weights[idx] == 0.0 || z_partition[i] == 0.0 {
                    continue;
                }
                let p_ygx = (weights[idx] / z_partition[i]).min(1.0);
                pk_new += track.w * p_ygx;

                let wt = track.w * p_ygx * track.dt2_inv;
                sw_t += wt * track.t;
                sum_wt += wt;
                let wz = track.w * p_ygx * track.dz2_inv;
                sw_z += wz * track.z;
                sum_wz += wz;

                let p_xgy = p_ygx * track.w / vtx.pk[k];
                let dt = (track.t - vtx.t[k]) * track.dt_inv();
                let dz = (track.z - vtx.z[k]) * track.dz_inv();
                let wtt = p_xgy * track.dt2_inv;
                let wzz = p_xgy * track.dz2_inv;
                let wtz = p_xgy * track.dt_inv() * track.dz_inv();
                stt += wtt * dt * dt;
                szz += wzz * dz * dz;
                stz += wtz * dt * dz;
                sum_ptt += wtt;
                sum_pzz += wzz;
                sum_ptz += wtz;
            }

            if pk_new == 0.0 {
                vtx.remove(k);
                continue;
            }

            pk_new /= tracks.iter().map(|t| t.w).sum::<f64>().max(1.0e-12);
            sum_pk += pk_new;

            let new_z = sw_z / sum_wz;
            let new_t = sw_t / sum_wt;
            let z_displ = (new_z - vtx.z[k]) / cfg.vertex_z_size;
            let t_displ = (new_t - vtx.t[k]) / cfg.vertex_t_size;
            delta2_max = f64::max(delta2_max, z_displ * z_displ + t_displ * t_displ);

            vtx.z[k] = new_z;
            vtx.t[k] = new_t;
            vtx.pk[k] = pk_new;
            vtx.szz[k] = szz / sum_pzz;
            vtx.stt[k] = stt / sum_ptt;
            vtx.stz[k] = stz / sum_ptz;
            k += 1;
        }
        let _ = sum_pk;
        delta2_max
    }

    fn merge(&self, vtx: &mut Vertices, cfg: &DaConfig) -> bool {
        if vtx.len() < 2 {
            return false;
        }
        let mut merged = false;
        loop {
            let mut best = None;
            for k1 in 0..vtx.len() {
                for k2 in (k1 + 1)..vtx.len() {
                    let d2 = vtx.distance2(k1, k2, cfg.vertex_z_size, cfg.vertex_t_size);
                    if d2 < cfg.d2_merge && best.map_or(true, |(_, _, best_d2)| d2 < best_d2) {
                        best = Some((k1, k2, d2));
                    }
                }
            }
            match best {
                Some((k1, k2, _)) => {
                    let total_pk = vtx.pk[k1] + vtx.pk[k2];
                    let z = (vtx.z[k1] * vtx.pk[k1] + vtx.z[k2] * vtx.pk[k2]) / total_pk;
                    let t = (vtx.t[k1] * vtx.pk[k1] + vtx.t[k2] * vtx.pk[k2]) / total_pk;
                    vtx.remove(k2);
                    vtx.remove(k1);
                    vtx.add(z, t, total_pk);
                    merged = true;
                }
                None => break,
            }
        }
        merged
    }

    #[allow(clippy::too_many_arguments)]
    fn split(&self, beta: f64, vtx: &mut Vertices, tracks: &[TrackFeature], cfg: &DaConfig) -> bool {
        let Some((min_beta_c, _)) = vtx.min_beta_c() else {
            return false;
        };
        if min_beta_c > beta {
            return false;
        }

        let mut split_happened = false;
        let nv = vtx.len();
        for k in 0..nv {
            if vtx.szz[k] == 0.0 && vtx.stt[k] == 0.0 {
                continue;
            }
            let diff = vtx.szz[k] - vtx.stt[k];
            let disc = (diff * diff + 4.0 * vtx.stz[k] * vtx.stz[k]).max(0.0).sqrt();
            let beta_c = 1.0 / (vtx.szz[k] + vtx.stt[k] + disc);
            if beta_c > beta {
                continue;
            }

            let mut zn = diff + disc;
            let mut tn = 2.0 * vtx.stz[k];
            let norm = zn.hypot(tn);
            if norm < 1.0e-12 {
                continue;
            }
            zn /= norm;
            tn /= norm;

            let (z_old, t_old, pk_old) = (vtx.z[k], vtx.t[k], vtx.pk[k]);
            let (mut p1, mut z1, mut t1, mut wz1, mut wt1) = (0.0, 0.0, 0.0, 0.0, 0.0);
            let (mut p2, mut z2, mut t2, mut wz2, mut wt2) = (0.0, 0.0, 0.0, 0.0, 0.0);
            let z_init = 0.0;
            let (weights, z_partition) = compute_weights(beta, vtx, tracks, z_init);
            let nt = tracks.len();
            for (i, track) in tracks.iter().enumerate() {
                if z_partition[i] <= 0.0 {
                    continue;
                }
                let lr = (track.t - t_old) * tn + (track.z - z_old) * zn;
                let (tl, tr) = if lr < 0.0 { (1.0, 0.0) } else { (0.0, 1.0) };
                let p = (track.w * weights[k * nt + i] / z_partition[i]).min(track.w);
                let wt = p * track.dt2_inv;
                let wz = p * track.dz2_inv;
                p1 += p * tl;
                z1 += wz * tl * track.z;
                t1 += wt * tl * track.t;
                wz1 += wz * tl;
                wt1 += wt * tl;
                p2 += p * tr;
                z2 += wz * tr * track.z;
                t2 += wt * tr * track.t;
                wz2 += wz * tr;
                wt2 += wt * tr;
            }

            if !(wz1 > 0.0 && wt1 > 0.0 && wz2 > 0.0 && wt2 > 0.0) {
                continue;
            }
            t1 /= wt1;
            z1 /= wz1;
            t2 /= wt2;
            z2 /= wz2;

            let mut guard = 0;
            while (vtx.nearest(t1, z1, cfg.vertex_z_size, cfg.vertex_t_size) != k
                || vtx.nearest(t2, z2, cfg.vertex_z_size, cfg.vertex_t_size) != k)
                && guard < 50
            {
                t1 = 0.5 * (t1 + t_old);
                z1 = 0.5 * (z1 + z_old);
                t2 = 0.5 * (t2 + t_old);
                z2 = 0.5 * (z2 + z_old);
                guard += 1;
            }

            let delta2 = vtx_delta2(z1, t1, z2, t2, cfg.vertex_z_size, cfg.vertex_t_size);
            if delta2 > cfg.d2_merge {
                split_happened = true;
                vtx.z[k] = z1;
                vtx.t[k] = t1;
                vtx.pk[k] = p1 * pk_old / (p1 + p2);
                let new_pk = p2 * pk_old / (p1 + p2);
                vtx.add(z2, t2, new_pk);
            }
        }
        split_happened
    }

    #[allow(clippy::too_many_arguments)]
    fn purge(&self, vtx: &mut Vertices, tracks: &[TrackFeature], rho0: f64, beta: f64, min_prob: f64, min_trk: i64, cfg: &DaConfig) -> bool {
        if vtx.len() < 2 {
            return false;
        }
        let nt = tracks.len();
        let z_init = rho0 * (-beta * cfg.mu_outlier * cfg.mu_outlier).exp();
        let (weights, z_partition) = compute_weights(beta, vtx, tracks, z_init);

        let mut best: Option<(usize, f64)> = None;
        for k in 0..vtx.len() {
            let pmax = vtx.pk[k] / (vtx.pk[k] + rho0 * (-beta * cfg.mu_outlier * cfg.mu_outlier).exp());
            let pcut = min_prob * pmax;
            let mut n_unique = 0i64;
            let mut sum_p = 0.0;
            for (i, track) in tracks.iter().enumerate() {
                let idx = k * nt + i;
                if weights[idx] == 0.0 || z_partition[i] == 0.0 {
                    continue;
                }
                let p = weights[idx] / z_partition[i];
                sum_p += p;
                if p > pcut && track.w > 0.0 {
                    n_unique += 1;
                }
            }
            if n_unique < min_trk && best.map_or(true, |(_, best_sum)| sum_p < best_sum) {
                best = Some((k, sum_p));
            }
        }

        if let Some((k0, _)) = best {
            vtx.remove(k0);
            true
        } else {
            false
        }
    }

    fn run_to_convergence(&self, beta: f64, tracks: &[TrackFeature], vtx: &mut Vertices, rho0: f64, cfg: &DaConfig, tol_factor: f64) {
        let mut niter = 0;
        loop {
            let delta2 = self.update(beta, tracks, vtx, rho0, cfg);
            niter += 1;
            if delta2 <= tol_factor * cfg.d2_update_lim || niter >= cfg.max_iterations {
                break;
            }
        }
    }

    fn clusterize(&self, cfg: &DaConfig, tracks: &[TrackFeature]) -> Vertices {
        let mut vtx = Vertices::default();
        vtx.add(0.0, 0.0, 1.0);

        let sum_w: f64 = tracks.iter().map(|t| t.w).sum();
        let sum_w_o_dz2: f64 = tracks.iter().map(|t| t.w * t.dz2_inv).sum();
        let sum_w_o_dt2: f64 = tracks.iter().map(|t| t.w * t.dt2_inv).sum();

        let mut beta = self.beta0(tracks, &mut vtx, sum_w, sum_w_o_dz2, sum_w_o_dt2, cfg);
        let mut rho0 = 0.0;

        let mut last_round = 0;
        while last_round < 2 {
            self.run_to_convergence(beta, tracks, &mut vtx, rho0, cfg, 1.0);
            let mut n_it = 0;
            while self.merge(&mut vtx, cfg) && n_it < cfg.max_iterations {
                self.run_to_convergence(beta, tracks, &mut vtx, rho0, cfg, 1.0);
                n_it += 1;
            }

            beta /= cfg.cooling_factor;
            if beta < cfg.beta_stop {
                self.split(beta, &mut vtx, tracks, cfg);
            } else {
                beta = cfg.beta_stop;
                last_round += 1;
            }
        }

        rho0 = if tracks.is_empty() { 0.0 } else { 1.0 / tracks.len() as f64 };
        for f in 1..=10 {
            self.run_to_convergence(beta, tracks, &mut vtx, rho0 * f as f64 / 10.0, cfg, 0.3);
        }

        loop {
            beta /= cfg.cooling_factor;
            if beta > cfg.beta_purge {
                beta = cfg.beta_purge;
            }
            for min_trk in 2..=cfg.min_n_track {
                while self.purge(&mut vtx, tracks, rho0, beta, cfg.min_track_prob, min_trk, cfg) {
                    self.run_to_convergence(beta, tracks, &mut vtx, rho0, cfg, 1.0);
                }
            }
            let mut n_it = 0;
            while self.merge(&mut vtx, cfg) && n_it < cfg.max_iterations {
                self.run_to_convergence(beta, tracks, &mut vtx, rho0, cfg, 1.0);
                n_it += 1;
            }
            if beta >= cfg.beta_purge {
                break;
            }
        }

        last_round = 0;
        while last_round < 2 {
            self.run_to_convergence(beta, tracks, &mut vtx, rho0, cfg, 0.3);
            beta /= cfg.cooling_factor;
            if beta >= cfg.beta_max {
                beta = cfg.beta_max;
                last_round += 1;
            }
        }

        vtx.final_beta_rho0 = Some((beta, rho0));
        vtx
    }

    fn process_impl(&mut self, store: &mut EventStore, _rng: &mut StreamRng) {
        let Some(cfg) = self.cfg.as_ref() else { return };
        let (tracks, discarded) = self.build_tracks(cfg, store);

        for id in discarded {
            let c = store.factory_mut().get_mut(id);
            c.cluster_index = -1;
            store.push(&self.track_output, id);
        }

        if tracks.is_empty() {
            return;
        }

        let mut vtx = self.clusterize(cfg, &tracks);
        let (beta, rho0) = vtx.final_beta_rho0.take().unwrap_or((cfg.beta_max, 0.0));

        let nv = vtx.len();
        let mut vertex_ids = Vec::with_capacity(nv);
        for k in 0..nv {
            let factory = store.factory_mut();
            let id = factory.new_candidate();
            {
                let v = factory.get_mut(id);
                v.cluster_index = k as i32;
                v.position = FourVector::new(0.0, 0.0, vtx.z[k], vtx.t[k]);
                v.sum_pt = 0.0;
                v.sum_pt2 = 0.0;
                v.cluster_ndf = 0;
            }
            vertex_ids.push(id);
        }

        let nt = tracks.len();
        let z_init = rho0 * (-beta * cfg.mu_outlier * cfg.mu_outlier).exp();
        let (weights, z_partition) = compute_weights(beta, &vtx, &tracks, z_init);

        for (i, track) in tracks.iter().enumerate() {
            if track.w <= 0.0 {
                store.push(&self.track_output, track.candidate);
                continue;
            }
            let mut p_max = 0.0;
            let mut k_max = None;
            for k in 0..nv {
                let idx = k * nt + i;
                if weights[idx] == 0.0 || z_partition[i] == 0.0 || vtx.pk[k] == 0.0 {
                    continue;
                }
                let pv_max = vtx.pk[k] / (vtx.pk[k] + rho0 * (-beta * cfg.mu_outlier * cfg.mu_outlier).exp());
                let p = (weights[idx] / z_partition[i]) / pv_max;
                if p > p_max {
                    p_max = p;
                    k_max = Some(k);
                }
            }

            if p_max > cfg.min_track_prob {
                let k = k_max.unwrap();
                let vertex_id = vertex_ids[k];
                let pt = store.factory().get(track.candidate).helix.pt;
                {
                    let c = store.factory_mut().get_mut(track.candidate);
                    c.cluster_index = k as i32;
                }
                {
                    let v = store.factory_mut().get_mut(vertex_id);
                    v.sum_pt += pt;
                    v.sum_pt2 += pt * pt;
                    v.cluster_ndf += 1;
                    v.children.push(track.candidate);
                }
            } else {
                let c = store.factory_mut().get_mut(track.candidate);
                c.cluster_index = -1;
            }
            store.push(&self.track_output, track.candidate);
        }

        for (k, &vertex_id) in vertex_ids.iter().enumerate() {
            let ndf = store.factory().get(vertex_id).cluster_ndf;
            if ndf == 0 {
                continue;
            }
            let children = store.factory().get(vertex_id).children.clone();
            let (vz, vt) = (vtx.z[k], vtx.t[k]);
            let (mut sum_dz2, mut sum_dt2, mut sum_wz, mut sum_wt) = (0.0, 0.0, 0.0, 0.0);
            for &child in &children {
                let c = store.factory().get(child);
                let dz = vz - c.helix.dz;
                let dt = vt - c.vertex_time;
                let wz = c.vertexing_weight / (c.helix.dz_error * c.helix.dz_error).max(1.0e-12);
                let wt = c.vertexing_weight / (cfg.track_time_resolution * cfg.track_time_resolution).max(1.0e-12);
                sum_dz2 += wz * dz * dz;
                sum_dt2 += wt * dt * dt;
                sum_wz += wz;
                sum_wt += wt;
            }
            let sigma_z = (sum_dz2 / sum_wz.max(1.0e-12)).sqrt();
            let sigma_t = (sum_dt2 / sum_wt.max(1.0e-12)).sqrt();
            let v = store.factory_mut().get_mut(vertex_id);
            v.cluster_sigma = (sigma_z, sigma_t);
            store.push(&self.vertex_output, vertex_id);
        }
    }
}

fn vtx_delta2(z1: f64, t1: f64, z2: f64, t2: f64, z_size: f64, t_size: f64) -> f64 {
    ((z1 - z2) / z_size).powi(2) + ((t1 - t2) / t_size).powi(2)
}

impl Module for VertexFinderDa4D {
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
    use crate::candidate::Helix;
    use crate::config::ParamValue;

    fn make_track(store: &mut EventStore, z: f64, t: f64, pt: f64) -> CandidateId {
        let id = store.factory_mut().new_candidate();
        let c = store.factory_mut().get_mut(id);
        c.helix = Helix {
            dz: z,
            d0: 0.0,
            d0_error: 0.01,
            dz_error: 0.05,
            pt,
            ctg_theta: 0.0,
            ..Helix::default()
        };
        c.position = FourVector::new(0.0, 0.0, 0.0, t);
        c.path_length = 0.0;
        id
    }

    #[test]
    fn single_cluster_of_nearby_tracks_forms_one_vertex() {
        let mut store = EventStore::new();
        store.declare("tracks");
        for (z, t) in [(0.0, 0.0), (0.1, 0.01), (-0.1, -0.01), (0.05, 0.0)] {
            let id = make_track(&mut store, z, t, 2.0);
            store.push("tracks", id);
        }

        let mut finder = VertexFinderDa4D::new();
        let config = ModuleConfig::new("vtx").with("PtMin", ParamValue::Double(0.1));
        finder.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        finder.process(&mut store, &mut rng);

        let vertices = store.get("vertices").unwrap();
        assert!(!vertices.is_empty());
    }

    #[test]
    fn build_tracks_persists_backpropagated_time_and_d0_weight() {
        let mut store = EventStore::new();
        store.declare("tracks");

        let id = store.factory_mut().new_candidate();
        {
            let c = store.factory_mut().get_mut(id);
            c.helix = Helix {
                dz: 0.0,
                d0: 0.06,
                d0_error: 0.1,
                dz_error: 0.05,
                pt: 2.0,
                ctg_theta: 0.0,
                ..Helix::default()
            };
            c.position = FourVector::new(0.0, 0.0, 0.0, 10.0);
            c.path_length = 500.0;
        }
        store.push("tracks", id);

        let mut finder = VertexFinderDa4D::new();
        let config = ModuleConfig::new("vtx")
            .with("PtMin", ParamValue::Double(0.1))
            .with("D0CutOff", ParamValue::Double(0.5))
            .with("DtCutOff", ParamValue::Double(10.0));
        finder.init(&config, &mut store).unwrap();

        let (tracks, discarded) = finder.build_tracks(finder.cfg.as_ref().unwrap(), &mut store);
        assert!(discarded.is_empty());
        assert_eq!(tracks.len(), 1);

        let c = store.factory().get(id);
        assert!((c.vertex_time - tracks[0].t).abs() < 1.0e-12, "persisted time must match the fitted feature");
        assert!(
            (c.vertex_time - c.position.t).abs() > 1.0e-6,
            "non-zero path length must shift the fitted time away from the raw measured time"
        );
        assert!((c.vertexing_weight - tracks[0].w).abs() < 1.0e-12, "persisted weight must match the fitted feature");
        assert!(c.vertexing_weight < 1.0, "d0 close to the cutoff must give a weight below 1");
    }

    #[test]
    fn no_tracks_produces_no_vertices() {
        let mut store = EventStore::new();
        store.declare("tracks");
        let mut finder = VertexFinderDa4D::new();
        let config = ModuleConfig::new("vtx");
        finder.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        finder.process(&mut store, &mut rng);

        assert!(store.get("vertices").unwrap().is_empty());
    }
}
