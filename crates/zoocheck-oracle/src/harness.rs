//! Harness: a phase program plus its memoized legal states.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::OracleError;
use crate::phase::{Phase, key_path};
use crate::search::{self, Lanes, Step};
use crate::state::State;

/// Number of keys a harness uses when none is given.
pub const DEFAULT_NUM_KEYS: usize = 2;

/// Default cap on the number of ambiguous phases per query.
pub const DEFAULT_MAX_AMBIGUOUS_PHASES: usize = 12;

/// Hard ceiling for the ambiguous-phase cap (the subset mask is a `u64`).
const AMBIGUOUS_PHASES_CEILING: usize = 32;

/// Final states of one executed-phase set, each with a witness serialization.
#[derive(Debug)]
pub struct Exploration {
    witnesses: BTreeMap<State, Vec<Step>>,
}

impl Exploration {
    /// Returns the reachable final states.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.witnesses.keys()
    }

    /// Returns a serialization producing `state`, if it is reachable.
    pub fn witness(&self, state: &State) -> Option<&[Step]> {
        self.witnesses.get(state).map(Vec::as_slice)
    }

    /// Iterates over `(state, witness)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&State, &[Step])> {
        self.witnesses.iter().map(|(s, w)| (s, w.as_slice()))
    }

    /// Returns the number of distinct final states.
    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    /// Returns true if no state is reachable. Never the case for a valid harness.
    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }
}

/// An ordered program of phases over `num_keys` keys.
///
/// The phases never change after construction. The exploration cache grows
/// monotonically and is safe to share across threads: concurrent misses may
/// compute the same entry twice, but only one result is kept and both are
/// identical.
#[derive(Debug)]
pub struct Harness {
    phases: Vec<Phase>,
    num_keys: usize,
    max_ambiguous: usize,
    cache: RwLock<HashMap<BTreeSet<usize>, Arc<Exploration>>>,
}

impl Harness {
    /// Creates a harness, rejecting phases that name keys outside `0..num_keys`.
    pub fn new(phases: Vec<Phase>, num_keys: usize) -> Result<Self, OracleError> {
        if let Some((index, phase)) = phases
            .iter()
            .enumerate()
            .find(|(_, phase)| phase.max_key().is_some_and(|key| key >= num_keys))
        {
            return Err(OracleError::InvalidHarness(format!(
                "phase {index} ({phase}) touches a key outside /key0../key{}",
                num_keys.saturating_sub(1)
            )));
        }

        Ok(Self::generated(phases, num_keys))
    }

    /// Builds a harness whose keys are valid by construction.
    pub(crate) fn generated(phases: Vec<Phase>, num_keys: usize) -> Self {
        Self {
            phases,
            num_keys,
            max_ambiguous: DEFAULT_MAX_AMBIGUOUS_PHASES,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the maximum number of ambiguous phases a query may carry.
    pub fn with_max_ambiguous_phases(mut self, limit: usize) -> Self {
        self.max_ambiguous = limit.min(AMBIGUOUS_PHASES_CEILING);
        self
    }

    /// Returns the phases.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Returns the number of phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns true if the program has no phases.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Returns the number of keys.
    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Returns the key paths, in key order.
    pub fn keys(&self) -> Vec<String> {
        (0..self.num_keys).map(key_path).collect()
    }

    /// Returns the all-zero initial state.
    pub fn initial_state(&self) -> State {
        State::zero(self.num_keys)
    }

    /// Returns the highest node id any phase names.
    pub fn max_node(&self) -> Option<usize> {
        self.phases.iter().filter_map(Phase::node).max()
    }

    fn check_indices(&self, indices: &BTreeSet<usize>) -> Result<(), OracleError> {
        match indices.iter().find(|&&index| index >= self.phases.len()) {
            Some(&index) => Err(OracleError::PhaseOutOfRange {
                index,
                len: self.phases.len(),
            }),
            None => Ok(()),
        }
    }

    /// Explores every serialization of exactly the `executed` phases.
    ///
    /// Results are memoized by the set of non-empty executed phases.
    pub fn explore(&self, executed: &BTreeSet<usize>) -> Result<Arc<Exploration>, OracleError> {
        self.check_indices(executed)?;
        let key: BTreeSet<usize> = executed
            .iter()
            .copied()
            .filter(|&index| self.phases[index].is_request())
            .collect();

        if let Some(hit) = self.cache.read().get(&key) {
            return Ok(Arc::clone(hit));
        }

        let lanes = Lanes::expand(&self.phases, &key);
        let exploration = Arc::new(Exploration {
            witnesses: search::explore(&lanes, self.num_keys),
        });
        debug!(executed = ?key, states = exploration.len(), "memoized exploration");

        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(key).or_insert(exploration)))
    }

    /// Returns every legal final state when `executed` definitely ran and any
    /// subset of `maybe` may also have run.
    ///
    /// Fails with [`OracleError::TooManyAmbiguousPhases`] instead of
    /// enumerating more than `2^limit` subsets.
    pub fn possible_states(
        &self,
        executed: &BTreeSet<usize>,
        maybe: &BTreeSet<usize>,
    ) -> Result<BTreeSet<State>, OracleError> {
        self.check_indices(executed)?;
        self.check_indices(maybe)?;

        let ambiguous: Vec<usize> = maybe
            .difference(executed)
            .copied()
            .filter(|&index| self.phases[index].is_request())
            .collect();
        if ambiguous.len() > self.max_ambiguous {
            return Err(OracleError::TooManyAmbiguousPhases {
                count: ambiguous.len(),
                limit: self.max_ambiguous,
            });
        }

        let mut states = BTreeSet::new();
        for mask in 0u64..(1u64 << ambiguous.len()) {
            let mut subset = executed.clone();
            subset.extend(
                ambiguous
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| mask & (1u64 << bit) != 0)
                    .map(|(_, &index)| index),
            );
            states.extend(self.explore(&subset)?.states().cloned());
        }
        Ok(states)
    }

    /// Replays a serialization of the `executed` phases and returns its final
    /// state.
    pub fn replay(&self, executed: &BTreeSet<usize>, steps: &[Step]) -> Result<State, OracleError> {
        self.check_indices(executed)?;
        let lanes = Lanes::expand(&self.phases, executed);
        search::replay(&lanes, self.num_keys, steps).map_err(OracleError::InvalidSerialization)
    }

    /// Returns the serializable description of this harness.
    pub fn to_def(&self) -> HarnessDef {
        HarnessDef {
            keys: self.num_keys,
            phases: self.phases.clone(),
        }
    }
}

impl fmt::Display for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (index, phase) in self.phases.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{phase}")?;
        }
        write!(f, "]")
    }
}

// ============================================================================
// Harness Files
// ============================================================================

fn default_num_keys() -> usize {
    DEFAULT_NUM_KEYS
}

/// On-disk form of a harness (TOML or JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessDef {
    /// Number of keys.
    #[serde(default = "default_num_keys")]
    pub keys: usize,

    /// The program.
    pub phases: Vec<Phase>,
}

impl TryFrom<HarnessDef> for Harness {
    type Error = OracleError;

    fn try_from(def: HarnessDef) -> Result<Self, Self::Error> {
        Harness::new(def.phases, def.keys)
    }
}
