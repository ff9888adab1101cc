//! Seedable randomness for scenario runs.
//!
//! Every random choice of a run (fault counts, crashed subsets, start/stop
//! timing) flows from one `SimRng` seeded with the run's seed, so a logged
//! seed reproduces the schedule.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

/// Deterministic random number generator.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: SmallRng,
    seed: u64,
}

impl SimRng {
    /// Creates a generator from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Creates a generator from a fresh random seed. Log [`SimRng::seed`]
    /// to reproduce it.
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// Returns the seed this generator was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    pub fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    pub fn next_bool(&mut self) -> bool {
        self.inner.gen_bool(0.5)
    }

    /// Returns a uniform value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen_range(0.0..1.0)
    }

    /// Returns a uniform value in `[0, max)`. `max` must be positive.
    pub fn next_usize(&mut self, max: usize) -> usize {
        self.inner.gen_range(0..max)
    }

    /// Samples an exponentially distributed delay with the given mean.
    pub fn exponential(&mut self, mean: Duration) -> Duration {
        let u = self.next_f64();
        mean.mul_f64(-(1.0 - u).ln())
    }

    /// Derives an independent generator.
    pub fn fork(&mut self) -> SimRng {
        SimRng::new(self.next_u64())
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}
