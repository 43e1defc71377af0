//! Deterministic, per-event pseudo-random source.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// A reproducible stream of random numbers for one event.
///
/// Re-seeded at the start of every event from a hash of `(run, event)` so that a single event can
/// be replayed in isolation and reproduces bit-identical smearing, independent of which events ran
/// before it and of how many worker threads a parallel run used.
#[derive(Debug)]
pub struct StreamRng {
    inner: Pcg64Mcg,
}

impl StreamRng {
    /// Seeds a stream from `(run, event)`.
    #[must_use]
    pub fn for_event(run: u64, event: u64) -> Self {
        let mut hasher = FxHasher::default();
        run.hash(&mut hasher);
        event.hash(&mut hasher);
        let seed = hasher.finish();
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Draws `U(0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Draws `U(lo, hi)`.
    pub fn uniform_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.uniform()
    }

    /// Draws a standard normal variate via Box-Muller.
    pub fn gaussian(&mut self) -> f64 {
        let u1 = self.uniform().max(f64::MIN_POSITIVE);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Draws `N(mean, sigma)`.
    pub fn gaussian_with(&mut self, mean: f64, sigma: f64) -> f64 {
        mean + sigma * self.gaussian()
    }

    /// Draws a log-normal variate with underlying-normal `mean`/`sigma`, i.e. `exp(N(mean,
    /// sigma))`.
    pub fn log_normal(&mut self, mean: f64, sigma: f64) -> f64 {
        self.gaussian_with(mean, sigma).exp()
    }

    /// Draws a log-normal variate whose own mean and sigma (not the underlying normal's) equal
    /// `mean`/`sigma`, matching the calorimeter's tower energy-resolution smearing law: the
    /// underlying normal parameters are back-solved from the requested first two moments.
    /// Returns `0.0` for non-positive `mean`, matching the "nothing accumulated" tower case.
    pub fn log_normal_mean_sigma(&mut self, mean: f64, sigma: f64) -> f64 {
        if mean <= 0.0 {
            return 0.0;
        }
        let b2 = (1.0 + (sigma * sigma) / (mean * mean)).ln();
        let b = b2.sqrt();
        let a = mean.ln() - 0.5 * b2;
        (a + b * self.gaussian()).exp()
    }

    /// Draws a Poisson variate via Knuth's multiplicative algorithm. Intended for small `lambda`
    /// (pile-up multiplicity); not optimized for large means.
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        if lambda <= 0.0 {
            return 0;
        }
        let l = (-lambda).exp();
        let mut k = 0u64;
        let mut p = 1.0;
        loop {
            k += 1;
            p *= self.uniform();
            if p <= l {
                return k - 1;
            }
        }
    }
}
