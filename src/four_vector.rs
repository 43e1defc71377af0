//! Four-component vectors used for both momenta and positions.

use std::ops::{Add, AddAssign, Sub};

/// A generic four-vector.
///
/// For momenta the components are `(px, py, pz, e)`; for positions they are `(x, y, z, t)`, with
/// `x, y, z` in millimeters and `t` in nanoseconds (see [`crate::propagator`] for why the kernel
/// uses this convention rather than storing `c*t` in millimeters).
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FourVector {
    /// First spatial component (`px` or `x`).
    pub x: f64,
    /// Second spatial component (`py` or `y`).
    pub y: f64,
    /// Third spatial component (`pz` or `z`).
    pub z: f64,
    /// Temporal/energy component (`e` or `t`).
    pub t: f64,
}

impl FourVector {
    /// Constructs a new four-vector from its components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, t: f64) -> Self {
        Self { x, y, z, t }
    }

    /// The origin / zero four-vector.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Transverse component `sqrt(x^2 + y^2)`.
    #[must_use]
    pub fn pt(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Transverse component squared.
    #[must_use]
    pub fn pt2(&self) -> f64 {
        self.x.mul_add(self.x, self.y * self.y)
    }

    /// Magnitude of the three-vector part.
    #[must_use]
    pub fn p(&self) -> f64 {
        self.pt().hypot(self.z)
    }

    /// Azimuthal angle, wrapped into `(-pi, pi]`.
    #[must_use]
    pub fn phi(&self) -> f64 {
        wrap_phi(self.y.atan2(self.x))
    }

    /// Pseudorapidity. Returns a saturating large value along the beam axis rather than NaN.
    #[must_use]
    pub fn eta(&self) -> f64 {
        let p = self.p();
        if p <= self.z.abs() {
            return if self.z >= 0.0 { f64::MAX } else { -f64::MAX };
        }
        0.5 * ((p + self.z) / (p - self.z)).ln()
    }

    /// `pz / pt`, the cotangent of the polar angle; `f64::MAX`-saturated when `pt` vanishes.
    #[must_use]
    pub fn ctg_theta(&self) -> f64 {
        let pt = self.pt();
        if pt < 1.0e-12 {
            return if self.z >= 0.0 { f64::MAX } else { -f64::MAX };
        }
        self.z / pt
    }

    /// Treats this vector as a momentum and returns the relativistic mass-shell energy for the
    /// given mass, i.e. `sqrt(p^2 + m^2)`.
    #[must_use]
    pub fn energy_for_mass(&self, mass: f64) -> f64 {
        self.p().hypot(mass)
    }

    /// Builds a momentum four-vector from `(pt, eta, phi, e)`.
    #[must_use]
    pub fn from_pt_eta_phi_e(pt: f64, eta: f64, phi: f64, e: f64) -> Self {
        Self::new(pt * phi.cos(), pt * phi.sin(), pt * eta.sinh(), e)
    }

    /// Euclidean distance between the spatial parts of `self` and `other`.
    #[must_use]
    pub fn spatial_distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Add for FourVector {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.x + rhs.x,
            self.y + rhs.y,
            self.z + rhs.z,
            self.t + rhs.t,
        )
    }
}

impl AddAssign for FourVector {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for FourVector {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.x - rhs.x,
            self.y - rhs.y,
            self.z - rhs.z,
            self.t - rhs.t,
        )
    }
}

/// Wraps an angle into `(-pi, pi]`.
#[must_use]
pub fn wrap_phi(mut phi: f64) -> f64 {
    const TWO_PI: f64 = std::f64::consts::TAU;
    while phi <= -std::f64::consts::PI {
        phi += TWO_PI;
    }
    while phi > std::f64::consts::PI {
        phi -= TWO_PI;
    }
    phi
}

/// Angular separation `sqrt(deta^2 + dphi^2)` between two `(eta, phi)` points.
#[must_use]
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = wrap_phi(phi1 - phi2);
    deta.hypot(dphi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_and_p() {
        let v = FourVector::new(3.0, 4.0, 12.0, 0.0);
        assert!(float_cmp::approx_eq!(f64, v.pt(), 5.0, ulps = 4));
        assert!(float_cmp::approx_eq!(f64, v.p(), 13.0, ulps = 4));
    }

    #[test]
    fn phi_wrapping() {
        assert!(float_cmp::approx_eq!(
            f64,
            wrap_phi(3.0 * std::f64::consts::PI),
            std::f64::consts::PI,
            ulps = 8
        ));
        assert!(float_cmp::approx_eq!(
            f64,
            wrap_phi(-3.0 * std::f64::consts::PI),
            std::f64::consts::PI,
            ulps = 8
        ));
    }

    #[test]
    fn delta_r_wraps_phi() {
        let dr = delta_r(0.0, 3.1, 0.0, -3.1);
        assert!(dr < 0.1);
    }
}
