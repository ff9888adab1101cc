//! Random subsets of server ids.

use crate::rng::SimRng;

/// Samples uniformly random subsets of `0..n`.
#[derive(Debug, Clone)]
pub struct SubsetSampler {
    rng: SimRng,
}

impl SubsetSampler {
    pub fn new(rng: SimRng) -> Self {
        Self { rng }
    }

    /// Returns a sorted, uniformly random `k`-subset of `0..n`.
    ///
    /// `k` is clamped to `n`.
    pub fn sample(&mut self, n: usize, k: usize) -> Vec<usize> {
        let k = k.min(n);
        let mut reservoir: Vec<usize> = (0..k).collect();
        for i in k..n {
            let j = self.rng.next_usize(i + 1);
            if j < k {
                reservoir[j] = i;
            }
        }
        reservoir.sort_unstable();
        reservoir
    }

    /// Returns a uniformly random subset of `0..n`: every element is kept
    /// with probability ½.
    pub fn sample_any(&mut self, n: usize) -> Vec<usize> {
        (0..n).filter(|_| self.rng.next_bool()).collect()
    }

    /// Returns a random subset of the smallest majority size.
    pub fn minimal_quorum(&mut self, n: usize) -> Vec<usize> {
        self.sample(n, n / 2 + 1)
    }
}
