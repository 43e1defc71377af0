//! The universal [`Candidate`] record and the arena that owns it.

use crate::four_vector::FourVector;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Index of a [`Candidate`] inside a [`Factory`] arena.
///
/// Stable for the lifetime of the event: a candidate's id never changes once assigned, and ids
/// are unique within a single event store (re-used only after [`Factory::clear`]).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct CandidateId(pub u32);

impl CandidateId {
    /// Sentinel used for "no mother" / "no daughter" / "unassigned vertex" slots.
    pub const NONE: i64 = -1;
}

bitflags! {
    /// Heavy-flavour tagging bitfield (b-tag).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
    pub struct BTagBits: u32 {
        /// Heaviest-hadron-based tag.
        const HEAVIEST = 0b0000_0001;
        /// Algorithmic (ghost-matching) tag.
        const ALGORITHMIC = 0b0000_0010;
        /// Physics (hard-scatter record) tag.
        const PHYSICS = 0b0000_0100;
    }
}

bitflags! {
    /// Tau-tagging bitfield.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
    pub struct TauTagBits: u32 {
        /// One-prong hadronic decay signature.
        const ONE_PRONG = 0b0000_0001;
        /// Three-prong hadronic decay signature.
        const THREE_PRONG = 0b0000_0010;
    }
}

/// The 5x5 symmetric track covariance over `(D0, phi, C, DZ, ctgTheta)`, stored as a flat
/// 25-element array per the kernel's data-model invariant.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct TrackCovariance(pub [f64; 25]);

impl Default for TrackCovariance {
    fn default() -> Self {
        Self([0.0; 25])
    }
}

impl TrackCovariance {
    /// Reads the `(row, col)` entry, `row` and `col` in `0..5`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row * 5 + col]
    }

    /// Writes `value` symmetrically into `(row, col)` and `(col, row)`.
    pub fn set_symmetric(&mut self, row: usize, col: usize, value: f64) {
        self.0[row * 5 + col] = value;
        self.0[col * 5 + row] = value;
    }
}

/// Track-parameter helix block filled by the propagator and refined by downstream smearing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Helix {
    /// Transverse impact parameter, mm.
    pub d0: f64,
    /// Longitudinal impact parameter, mm.
    pub dz: f64,
    /// Signed curvature, 1/mm.
    pub c: f64,
    /// Total momentum magnitude, GeV.
    pub p: f64,
    /// Transverse momentum, GeV.
    pub pt: f64,
    /// Cotangent of the polar angle at closest approach.
    pub ctg_theta: f64,
    /// Azimuthal angle at closest approach.
    pub phi: f64,
    /// Error on `d0`.
    pub d0_error: f64,
    /// Error on `dz`.
    pub dz_error: f64,
    /// Error on `c`.
    pub c_error: f64,
    /// Error on `ctg_theta`.
    pub ctg_theta_error: f64,
    /// Error on `phi`.
    pub phi_error: f64,
    /// 5x5 covariance over `(D0, phi, C, DZ, ctgTheta)`.
    pub covariance: TrackCovariance,
}

/// Polymorphic sort dimension carried by a candidate; resolved at compare time rather than
/// through a vtable, mirroring how each candidate *type* (not instance) picks one scalar.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum SortKey {
    /// Energy, `momentum.t`.
    #[default]
    Energy,
    /// Transverse energy, `energy / cosh(eta)`.
    Et,
    /// Transverse momentum of the candidate's own momentum vector.
    Pt,
    /// Transverse momentum computed from the 4-momentum (distinct from `Pt` for composites whose
    /// `momentum` field is an aggregate rather than a measured track `PT`).
    MomentumPt,
    /// Sum of transverse-momentum-squared of constituents (vertices).
    SumPt2,
}

impl SortKey {
    /// Evaluates the scalar used for descending sorts.
    #[must_use]
    pub fn value(self, candidate: &Candidate) -> f64 {
        match self {
            Self::Energy => candidate.momentum.t,
            Self::Et => {
                let eta = candidate.momentum.eta();
                candidate.momentum.t / eta.cosh()
            }
            Self::Pt | Self::MomentumPt => candidate.momentum.pt(),
            Self::SumPt2 => candidate.sum_pt2,
        }
    }
}

/// The universal per-object record threaded through the reconstruction pipeline.
///
/// See the crate-level data model documentation for the semantics of each field group; field
/// names here follow the grouping of identity / kinematics / helix / calorimetry / isolation /
/// substructure / flavour / grouping / vertexing used throughout the specification this kernel
/// implements.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Candidate {
    /// Stable unique id, constant for the candidate's lifetime.
    pub id: CandidateId,
    /// PDG Monte Carlo id.
    pub pid: i32,
    /// Generator status code.
    pub status: i32,
    /// Electric charge, in units of `e`.
    pub charge: i32,
    /// Mass, GeV.
    pub mass: f64,
    /// First mother index, or `CandidateId::NONE`.
    pub mother1: i64,
    /// Second mother index, or `CandidateId::NONE`.
    pub mother2: i64,
    /// First daughter index, or `CandidateId::NONE`.
    pub daughter1: i64,
    /// Second daughter index, or `CandidateId::NONE`.
    pub daughter2: i64,
    /// Set for particles originating from pile-up collisions.
    pub is_pileup: bool,
    /// Set for reconstructed objects attributed to pile-up.
    pub is_reco_pileup: bool,

    /// Four-momentum `(px, py, pz, e)`.
    pub momentum: FourVector,
    /// Pre-propagation four-position.
    pub initial_position: FourVector,
    /// Post-propagation ("current") four-position.
    pub position: FourVector,
    /// Decay position, for particles that decay in flight.
    pub decay_position: FourVector,
    /// Jet-area four-vector, used by pile-up area subtraction.
    pub area: FourVector,

    /// Helix / track parameters.
    pub helix: Helix,
    /// Path length from production to the point `position` was recorded, mm.
    pub path_length: f64,
    /// Point of closest approach to the beam axis.
    pub closest_approach: (f64, f64, f64),
    /// First-hit point in the tracking volume.
    pub first_hit: (f64, f64, f64),
    /// Fractional detector resolution assumed for this track, used by calorimeter e-flow.
    pub track_resolution: f64,

    /// Electromagnetic energy fraction, GeV.
    pub e_em: f64,
    /// Hadronic energy fraction, GeV.
    pub e_had: f64,
    /// Track-measured energy subtracted from a tower during e-flow.
    pub e_trk: f64,
    /// Tower edges `(eta_lo, eta_hi, phi_lo, phi_hi)`.
    pub tower_edges: (f64, f64, f64, f64),
    /// Number of hits contributing to the tower time measurement.
    pub n_time_hits: i32,
    /// Per-hit `(energy, time)` pairs contributing to this tower/candidate.
    pub hit_energy_time: Vec<(f64, f64)>,

    /// Charged, non-pile-up isolation cone sum.
    pub iso_sum_charged: f64,
    /// Charged, pile-up isolation cone sum.
    pub iso_sum_charged_pu: f64,
    /// Neutral isolation cone sum.
    pub iso_sum_neutral: f64,
    /// Final isolation variable (absolute or relative, depending on the isolation module).
    pub isolation_var: f64,

    /// N-subjettiness values `tau_1..tau_5`.
    pub tau: [f64; 5],
    /// Trimmed 4-momenta; index 0 is the whole jet, 1..4 are subjets.
    pub trimmed_p4: [FourVector; 5],
    /// Pruned 4-momenta; index 0 is the whole jet, 1..4 are subjets.
    pub pruned_p4: [FourVector; 5],
    /// Soft-drop 4-momenta; index 0 is the whole jet, 1..4 are subjets.
    pub soft_dropped_p4: [FourVector; 5],
    /// Exclusive-`kt` merging scales `y_01, y_12, ...`.
    pub exclusive_y: Vec<f64>,

    /// Flavour by heaviest in-cone parton.
    pub flavor_heaviest: i32,
    /// Flavour by highest-pT in-cone parton.
    pub flavor_highest_pt: i32,
    /// Flavour by nearest-in-DeltaR parton.
    pub flavor_nearest: i32,
    /// Algorithmic (ghost-matched) flavour.
    pub flavor_algo: i32,
    /// Physics (hard-scatter record) flavour.
    pub flavor_phys: i32,
    /// b-tag bits.
    pub b_tag: BTagBits,
    /// tau-tag bits.
    pub tau_tag: TauTagBits,
    /// tau-identification weight/score.
    pub tau_weight: f64,

    /// Leaf/child candidates aggregated into this composite (jets, towers, vertices). Weak
    /// references into the same arena; never owning, never cyclic.
    pub children: Vec<CandidateId>,

    /// Vertex-cluster assignment, or `-1` if unassigned.
    pub cluster_index: i32,
    /// Number of tracks assigned to this vertex cluster.
    pub cluster_ndf: i32,
    /// Residual-based `(sigma_z, sigma_t)` resolution of this vertex cluster.
    pub cluster_sigma: (f64, f64),
    /// Sum of pT of a vertex's assigned tracks.
    pub sum_pt: f64,
    /// Sum of pT^2 of a vertex's assigned tracks.
    pub sum_pt2: f64,
    /// Sum of pT^2 restricted to b-/tau-tag vertexing tracks.
    pub btv_sum_pt2: f64,
    /// Generator-level sum of pT^2, for validation against truth.
    pub gen_sum_pt2: f64,
    /// Generator-level delta-z with respect to the matched truth vertex.
    pub gen_delta_z: f64,

    /// Per-track d0-significance vertexing weight (`w` in the DA finder), set once the track
    /// passes the vertex finder's quality cuts and read back when a vertex's residual resolution
    /// is computed from its assigned tracks.
    pub vertexing_weight: f64,
    /// Flight-time-backpropagated time used for vertex fitting, i.e. `position.t` corrected for
    /// the time-of-flight from production to `position` (Delphes' `Td`).
    pub vertex_time: f64,

    /// The polymorphic sort dimension for this candidate's type.
    pub sort_key: SortKey,
}

impl Candidate {
    fn new(id: CandidateId) -> Self {
        Self {
            id,
            pid: 0,
            status: 0,
            charge: 0,
            mass: 0.0,
            mother1: CandidateId::NONE,
            mother2: CandidateId::NONE,
            daughter1: CandidateId::NONE,
            daughter2: CandidateId::NONE,
            is_pileup: false,
            is_reco_pileup: false,
            momentum: FourVector::zero(),
            initial_position: FourVector::zero(),
            position: FourVector::zero(),
            decay_position: FourVector::zero(),
            area: FourVector::zero(),
            helix: Helix::default(),
            path_length: 0.0,
            closest_approach: (0.0, 0.0, 0.0),
            first_hit: (0.0, 0.0, 0.0),
            track_resolution: 0.0,
            e_em: 0.0,
            e_had: 0.0,
            e_trk: 0.0,
            tower_edges: (0.0, 0.0, 0.0, 0.0),
            n_time_hits: 0,
            hit_energy_time: Vec::new(),
            iso_sum_charged: 0.0,
            iso_sum_charged_pu: 0.0,
            iso_sum_neutral: 0.0,
            isolation_var: 0.0,
            tau: [0.0; 5],
            trimmed_p4: [FourVector::zero(); 5],
            pruned_p4: [FourVector::zero(); 5],
            soft_dropped_p4: [FourVector::zero(); 5],
            exclusive_y: Vec::new(),
            flavor_heaviest: 0,
            flavor_highest_pt: 0,
            flavor_nearest: 0,
            flavor_algo: 0,
            flavor_phys: 0,
            b_tag: BTagBits::empty(),
            tau_tag: TauTagBits::empty(),
            tau_weight: 0.0,
            children: Vec::new(),
            cluster_index: -1,
            cluster_ndf: 0,
            cluster_sigma: (0.0, 0.0),
            sum_pt: 0.0,
            sum_pt2: 0.0,
            btv_sum_pt2: 0.0,
            gen_sum_pt2: 0.0,
            gen_delta_z: 0.0,
            vertexing_weight: 1.0,
            vertex_time: 0.0,
            sort_key: SortKey::Energy,
        }
    }

    /// Adds `child` to this candidate's composite list (weak reference, no cycle checking beyond
    /// the generator DAG / tower-aggregation invariant the caller is expected to uphold).
    pub fn add_child(&mut self, child: CandidateId) {
        self.children.push(child);
    }

    /// Returns `true` iff `self` and `other` share at least one leaf, recursing through
    /// composites via `resolve`. Non-composite candidates (empty `children`) are treated as
    /// their own sole leaf.
    #[must_use]
    pub fn overlaps(&self, other: &Self, resolve: impl Fn(CandidateId) -> Vec<CandidateId>) -> bool {
        let leaves_a = leaf_ids(self.id, &self.children, &resolve);
        let leaves_b = leaf_ids(other.id, &other.children, &resolve);
        leaves_a.iter().any(|a| leaves_b.contains(a))
    }
}

fn leaf_ids(
    self_id: CandidateId,
    children: &[CandidateId],
    resolve: &impl Fn(CandidateId) -> Vec<CandidateId>,
) -> Vec<CandidateId> {
    if children.is_empty() {
        return vec![self_id];
    }
    let mut out = Vec::new();
    for &child in children {
        let grandchildren = resolve(child);
        if grandchildren.is_empty() {
            out.push(child);
        } else {
            out.extend(leaf_ids(child, &grandchildren, resolve));
        }
    }
    out
}

/// Sorts `ids` in place, descending by `key.value(..)`; ties compare equal and preserve relative
/// order (stable sort).
pub fn sort_descending_by_key(ids: &mut [CandidateId], key: SortKey, get: impl Fn(CandidateId) -> f64) {
    let _ = key;
    ids.sort_by(|&a, &b| get(b).total_cmp(&get(a)));
}

/// Owns the pooled arena of candidates for a single event.
///
/// `clear` returns every record to the pool without deallocating backing storage, matching the
/// "factory with an arena, cleared at event start" ownership model: no [`Candidate`] outlives a
/// call to [`Factory::clear`].
#[derive(Debug, Default)]
pub struct Factory {
    pool: Vec<Candidate>,
}

impl Factory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh candidate with default field values and returns its id.
    pub fn new_candidate(&mut self) -> CandidateId {
        let id = CandidateId(self.pool.len() as u32);
        self.pool.push(Candidate::new(id));
        id
    }

    /// Allocates a clone of `source`'s scalar fields (a new id, same children list) and returns
    /// the new id. Used by modules that need to carry a particle's state into a new output
    /// collection while still recording provenance.
    pub fn clone_candidate(&mut self, source: CandidateId) -> CandidateId {
        let mut clone = self.pool[source.0 as usize].clone();
        let id = CandidateId(self.pool.len() as u32);
        clone.id = id;
        self.pool.push(clone);
        id
    }

    /// Returns every record to the pool without shrinking the backing allocation.
    pub fn clear(&mut self) {
        self.pool.clear();
    }

    /// Number of live candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Returns `true` if no candidates have been allocated since the last `clear`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Immutable access to a candidate.
    #[must_use]
    pub fn get(&self, id: CandidateId) -> &Candidate {
        &self.pool[id.0 as usize]
    }

    /// Mutable access to a candidate.
    pub fn get_mut(&mut self, id: CandidateId) -> &mut Candidate {
        &mut self.pool[id.0 as usize]
    }

    /// Resolves the immediate children of `id`, or an empty vector for a leaf.
    #[must_use]
    pub fn children_of(&self, id: CandidateId) -> Vec<CandidateId> {
        self.get(id).children.clone()
    }

    /// Convenience wrapper around [`Candidate::overlaps`] that resolves children through `self`.
    #[must_use]
    pub fn overlaps(&self, a: CandidateId, b: CandidateId) -> bool {
        self.get(a)
            .overlaps(self.get(b), |id| self.children_of(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_unique() {
        let mut factory = Factory::new();
        let a = factory.new_candidate();
        let b = factory.new_candidate();
        assert_ne!(a, b);
        assert_eq!(factory.get(a).id, a);
        assert_eq!(factory.get(b).id, b);
    }

    #[test]
    fn clear_resets_without_losing_capacity() {
        let mut factory = Factory::new();
        for _ in 0..16 {
            factory.new_candidate();
        }
        let cap_before = factory.pool.capacity();
        factory.clear();
        assert_eq!(factory.len(), 0);
        assert_eq!(factory.pool.capacity(), cap_before);
    }

    #[test]
    fn clone_copies_scalars_and_shares_child_semantics() {
        let mut factory = Factory::new();
        let leaf = factory.new_candidate();
        let parent = factory.new_candidate();
        factory.get_mut(parent).pid = 11;
        factory.get_mut(parent).add_child(leaf);

        let clone_id = factory.clone_candidate(parent);
        assert_ne!(clone_id, parent);
        assert_eq!(factory.get(clone_id).pid, 11);
        assert_eq!(factory.get(clone_id).children, vec![leaf]);
    }

    #[test]
    fn overlap_detects_shared_leaf() {
        let mut factory = Factory::new();
        let leaf = factory.new_candidate();
        let other_leaf = factory.new_candidate();
        let jet_a = factory.new_candidate();
        factory.get_mut(jet_a).add_child(leaf);
        let jet_b = factory.new_candidate();
        factory.get_mut(jet_b).add_child(leaf);
        let jet_c = factory.new_candidate();
        factory.get_mut(jet_c).add_child(other_leaf);

        assert!(factory.overlaps(jet_a, jet_b));
        assert!(!factory.overlaps(jet_a, jet_c));
    }

    #[test]
    fn sort_descending_is_stable_on_ties() {
        let mut factory = Factory::new();
        let ids: Vec<_> = (0..4)
            .map(|i| {
                let id = factory.new_candidate();
                factory.get_mut(id).momentum = FourVector::new(0.0, 0.0, 0.0, if i < 2 { 5.0 } else { 10.0 });
                id
            })
            .collect();
        let mut sorted = ids.clone();
        sort_descending_by_key(&mut sorted, SortKey::Energy, |id| factory.get(id).momentum.t);
        assert_eq!(sorted, vec![ids[2], ids[3], ids[0], ids[1]]);
    }
}
