//! The sequential-consistency property checked after every run.

use std::collections::BTreeSet;

use crate::state::State;

/// Ways an observation can violate sequential consistency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyViolation {
    /// No server could be observed at all.
    #[error("no observations to check")]
    NoObservations,

    /// Two servers report different states.
    #[error("replicas diverged: server 0 observed {first}, server {server} observed {other}")]
    Diverged {
        first: State,
        server: usize,
        other: State,
    },

    /// All servers agree, but on a state no serialization produces.
    #[error("observed state {observed} is not among {} legal states", legal.len())]
    Illegal {
        observed: State,
        legal: BTreeSet<State>,
    },
}

/// All replicas must agree on one state from the legal set.
#[derive(Debug, Clone)]
pub struct ConsistencyProperty {
    legal: BTreeSet<State>,
}

impl ConsistencyProperty {
    /// Creates the property for the given legal states.
    pub fn new(legal: BTreeSet<State>) -> Self {
        Self { legal }
    }

    /// Returns the legal states.
    pub fn legal_states(&self) -> &BTreeSet<State> {
        &self.legal
    }

    /// Checks the states observed through each server, in server order.
    pub fn check(&self, observed: &[State]) -> Result<(), ConsistencyViolation> {
        let (first, rest) = observed
            .split_first()
            .ok_or(ConsistencyViolation::NoObservations)?;

        if let Some((offset, other)) = rest.iter().enumerate().find(|(_, s)| *s != first) {
            return Err(ConsistencyViolation::Diverged {
                first: first.clone(),
                server: offset + 1,
                other: other.clone(),
            });
        }

        if !self.legal.contains(first) {
            return Err(ConsistencyViolation::Illegal {
                observed: first.clone(),
                legal: self.legal.clone(),
            });
        }
        Ok(())
    }
}
