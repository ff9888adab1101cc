//! Fault-budget scheduling.
//!
//! A run has a fixed number of rounds (phases), a cap on the faults injected
//! in one round and a total budget. The scheduler draws a per-round fault
//! count so that the whole sequence is uniform among every sequence that
//! meets the constraints.
//!
//! `T[r][d]` counts the ways to spread `d` faults over `r` rounds with at
//! most `cap` per round:
//!
//! ```text
//! T[r][d] = Σ_{f=0}^{min(cap, d)} T[r-1][d-f]
//! ```
//!
//! With `r` rounds and `d` faults left, round `r` takes `f` faults with
//! probability `T[r-1][d-f] / T[r][d]`. The row `T[0]` encodes the policy:
//! [`FaultPolicy::Exact`] only accepts an exhausted budget, while
//! [`FaultPolicy::AtMost`] accepts any leftover.
//!
//! Counts are `u128` and saturate. Saturation only occurs for tables far
//! beyond any practical run length and merely skews the distribution.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::rng::SimRng;

/// How the fault budget must be spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// The faults of all rounds add up to exactly the budget.
    #[default]
    Exact,

    /// The faults of all rounds add up to at most the budget.
    AtMost,
}

/// Draws the number of faults for each round of a run.
#[derive(Debug, Clone)]
pub struct FaultScheduler {
    policy: FaultPolicy,
    total_rounds: usize,
    max_per_round: usize,
    budget: usize,
    /// `(total_rounds + 1) × (budget + 1)`, row-major.
    arrangements: Vec<u128>,
    remaining_rounds: usize,
    remaining_budget: usize,
    rng: SimRng,
}

impl FaultScheduler {
    pub fn new(
        policy: FaultPolicy,
        total_rounds: usize,
        max_per_round: usize,
        budget: usize,
        rng: SimRng,
    ) -> Self {
        let width = budget + 1;
        let mut arrangements = vec![0u128; (total_rounds + 1) * width];
        match policy {
            FaultPolicy::Exact => arrangements[0] = 1,
            FaultPolicy::AtMost => arrangements[..width].fill(1),
        }

        for r in 1..=total_rounds {
            let (previous, current) = arrangements.split_at_mut(r * width);
            let previous = &previous[(r - 1) * width..];
            let current = &mut current[..width];

            let mut window = 0u128;
            for d in 0..width {
                window = window.saturating_add(previous[d]);
                if d > max_per_round {
                    window = window.saturating_sub(previous[d - max_per_round - 1]);
                }
                current[d] = window;
            }
        }

        Self {
            policy,
            total_rounds,
            max_per_round,
            budget,
            arrangements,
            remaining_rounds: total_rounds,
            remaining_budget: budget,
            rng,
        }
    }

    pub fn policy(&self) -> FaultPolicy {
        self.policy
    }

    pub fn total_rounds(&self) -> usize {
        self.total_rounds
    }

    pub fn max_per_round(&self) -> usize {
        self.max_per_round
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn remaining_rounds(&self) -> usize {
        self.remaining_rounds
    }

    pub fn remaining_budget(&self) -> usize {
        self.remaining_budget
    }

    /// Number of ways to spread `faults` over `rounds` rounds.
    pub fn arrangements(&self, rounds: usize, faults: usize) -> u128 {
        if rounds > self.total_rounds || faults > self.budget {
            return 0;
        }
        self.arrangements[rounds * (self.budget + 1) + faults]
    }

    /// Returns true if some sequence meets the constraints.
    pub fn is_satisfiable(&self) -> bool {
        self.arrangements(self.total_rounds, self.budget) > 0
    }

    /// Rewinds to the first round with the full budget.
    pub fn reset(&mut self) {
        self.remaining_rounds = self.total_rounds;
        self.remaining_budget = self.budget;
    }

    /// Draws the fault count of the next round. Returns 0 once every round
    /// has been drawn.
    pub fn generate(&mut self) -> usize {
        if self.remaining_rounds == 0 {
            return 0;
        }

        let total = self.arrangements(self.remaining_rounds, self.remaining_budget);
        if total == 0 {
            // More faults left than the remaining rounds can hold.
            let faults = self.max_per_round.min(self.remaining_budget);
            self.remaining_budget -= faults;
            self.remaining_rounds -= 1;
            return faults;
        }

        let max_faults = self.max_per_round.min(self.remaining_budget);
        let total = total as f64;
        let mut sum = 0u128;
        let cumulative: Vec<f64> = (0..=max_faults)
            .map(|f| {
                sum = sum.saturating_add(
                    self.arrangements(self.remaining_rounds - 1, self.remaining_budget - f),
                );
                sum as f64 / total
            })
            .collect();

        let u = self.rng.next_f64();
        let faults = cumulative
            .partition_point(|&p| p <= u)
            .min(max_faults);
        trace!(
            round = self.total_rounds - self.remaining_rounds,
            faults,
            remaining = self.remaining_budget - faults,
            "drew round faults"
        );

        self.remaining_budget -= faults;
        self.remaining_rounds -= 1;
        faults
    }

    /// Draws a whole run and rewinds.
    pub fn sample_run(&mut self) -> Vec<usize> {
        self.reset();
        let run = (0..self.total_rounds).map(|_| self.generate()).collect();
        self.reset();
        run
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn scheduler(policy: FaultPolicy, rounds: usize, cap: usize, budget: usize, seed: u64) -> FaultScheduler {
        FaultScheduler::new(policy, rounds, cap, budget, SimRng::new(seed))
    }

    #[test_case(FaultPolicy::Exact, 3, 2, 3, 7 ; "exact three into three capped at two")]
    #[test_case(FaultPolicy::Exact, 2, 3, 3, 4 ; "exact three into two")]
    #[test_case(FaultPolicy::Exact, 2, 1, 3, 0 ; "exact unsatisfiable")]
    #[test_case(FaultPolicy::AtMost, 2, 1, 1, 3 ; "at most one into two")]
    #[test_case(FaultPolicy::AtMost, 3, 3, 0, 1 ; "at most zero")]
    fn test_arrangement_counts(policy: FaultPolicy, rounds: usize, cap: usize, budget: usize, expected: u128) {
        let s = scheduler(policy, rounds, cap, budget, 0);
        assert_eq!(s.arrangements(rounds, budget), expected);
        assert_eq!(s.is_satisfiable(), expected > 0);
    }

    #[test]
    fn test_extra_calls_return_zero() {
        let mut s = scheduler(FaultPolicy::Exact, 2, 3, 2, 1);
        let first = s.generate();
        let second = s.generate();
        assert_eq!(first + second, 2);
        assert_eq!(s.generate(), 0);
        assert_eq!(s.remaining_rounds(), 0);

        s.reset();
        assert_eq!(s.remaining_rounds(), 2);
        assert_eq!(s.remaining_budget(), 2);
    }

    #[test]
    fn test_unsatisfiable_budget_forces_cap() {
        let mut s = scheduler(FaultPolicy::Exact, 2, 1, 3, 4);
        assert_eq!(s.sample_run(), vec![1, 1]);
    }

    #[test]
    fn test_exact_is_uniform_over_sequences() {
        let mut s = scheduler(FaultPolicy::Exact, 3, 2, 3, 1234);
        let mut histogram: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        let draws = 7_000;
        for _ in 0..draws {
            *histogram.entry(s.sample_run()).or_default() += 1;
        }

        // (1,1,1) plus the six orderings of (0,1,2): 1000 each expected.
        assert_eq!(histogram.len(), 7);
        for (run, count) in histogram {
            assert!((850..1150).contains(&count), "{run:?} drawn {count} times");
        }
    }

    #[test]
    fn test_at_most_is_uniform_over_sequences() {
        let mut s = scheduler(FaultPolicy::AtMost, 2, 1, 1, 99);
        let mut histogram: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        for _ in 0..6_000 {
            *histogram.entry(s.sample_run()).or_default() += 1;
        }

        // (0,0), (0,1), (1,0): 2000 each expected.
        assert_eq!(histogram.len(), 3);
        for (run, count) in histogram {
            assert!((1800..2200).contains(&count), "{run:?} drawn {count} times");
        }
    }

    proptest! {
        #[test]
        fn prop_exact_spends_whole_budget(seed in any::<u64>(), rounds in 1usize..8, cap in 1usize..4, budget in 0usize..10) {
            prop_assume!(budget <= rounds * cap);
            let mut s = scheduler(FaultPolicy::Exact, rounds, cap, budget, seed);
            let run = s.sample_run();
            prop_assert_eq!(run.len(), rounds);
            prop_assert!(run.iter().all(|&f| f <= cap));
            prop_assert_eq!(run.iter().sum::<usize>(), budget);
        }

        #[test]
        fn prop_at_most_stays_within_budget(seed in any::<u64>(), rounds in 1usize..8, cap in 0usize..4, budget in 0usize..10) {
            let mut s = scheduler(FaultPolicy::AtMost, rounds, cap, budget, seed);
            let run = s.sample_run();
            prop_assert!(run.iter().all(|&f| f <= cap));
            prop_assert!(run.iter().sum::<usize>() <= budget);
        }
    }
}
