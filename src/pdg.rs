//! PDG Monte Carlo ID helpers and the default calorimeter response table.
//!
//! Fraction maps are configuration data (see [`crate::calorimeter::FractionMap`]); the constants
//! here are only the fallback values used when a configuration omits them, documented in the
//! original detector description as the "default" entry (PDG id `0`).

/// Electron PDG code.
pub const ELECTRON: i32 = 11;
/// Muon PDG code.
pub const MUON: i32 = 13;
/// Photon PDG code.
pub const PHOTON: i32 = 22;
/// Gluon PDG code.
pub const GLUON: i32 = 21;

/// Charged pion mass in GeV, the default mass assumption for tracks of unknown species.
pub const CHARGED_PION_MASS: f64 = 0.13957;

/// Vacuum speed of light, expressed in millimeters per nanosecond.
///
/// This is the natural unit for a kernel that stores spatial positions in millimeters and times
/// in nanoseconds: `299.792458 mm/ns == 2.99792458e8 m/s`.
pub const C_LIGHT_MM_PER_NS: f64 = 299.792458;

/// Returns `true` for the two species the calorimeter treats as purely electromagnetic
/// (electrons and photons), used to flag photon-candidate towers.
#[must_use]
pub fn is_electromagnetic(abs_pid: i32) -> bool {
    abs_pid == ELECTRON || abs_pid == PHOTON
}

/// The PDG id used as the fall-through key in fraction and mass maps when a specific particle
/// species has not been configured.
pub const DEFAULT_KEY: i32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn electromagnetic_species() {
        assert!(is_electromagnetic(11));
        assert!(is_electromagnetic(22));
        assert!(!is_electromagnetic(211));
        assert!(!is_electromagnetic(2112));
    }
}
