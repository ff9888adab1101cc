//! # Sequential-Consistency Oracle
//!
//! Given a harness (an ordered program of per-node phases) and the phases
//! that definitely or possibly executed during a run, this crate computes the
//! complete set of final key/value states a sequentially consistent store may
//! legally expose.
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use zoocheck_oracle::{Harness, Phase, State};
//!
//! let harness = Harness::new(
//!     vec![
//!         Phase::UnconditionalWrite { node: 2, key: 0, value: 102 },
//!         Phase::Empty,
//!         Phase::UnconditionalWrite { node: 2, key: 1, value: 302 },
//!     ],
//!     2,
//! )?;
//!
//! let legal = harness.possible_states(&BTreeSet::new(), &BTreeSet::from([0]))?;
//! assert!(legal.contains(&State::from_values(vec![102, 0])));
//! assert!(legal.contains(&State::from_values(vec![0, 0])));
//! # Ok::<(), zoocheck_oracle::OracleError>(())
//! ```
//!
//! ## Model
//!
//! - **Executed** phases took effect.
//! - **Maybe-executed** phases may or may not have taken effect. The oracle
//!   unions the legal states of every subset of them.
//! - Everything else did not execute.
//!
//! A conditional write is atomic: its read and its write are never
//! separated by another node's operation.

pub mod generate;
pub mod harness;
pub mod phase;
pub mod property;
pub mod search;
pub mod state;

pub use generate::{HarnessIterator, RandomHarnessGenerator};
pub use harness::{
    DEFAULT_MAX_AMBIGUOUS_PHASES, DEFAULT_NUM_KEYS, Exploration, Harness, HarnessDef,
};
pub use phase::{KeyIndex, NodeId, Phase, key_path};
pub use property::{ConsistencyProperty, ConsistencyViolation};
pub use search::{Step, StepKind};
pub use state::State;

// ============================================================================
// Oracle Error Types
// ============================================================================

/// Errors that can occur while evaluating a harness.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// A phase index does not exist in the harness.
    #[error("phase index {index} out of range (harness has {len} phases)")]
    PhaseOutOfRange { index: usize, len: usize },

    /// The maybe-executed set would need more subsets than allowed.
    #[error("{count} ambiguous phases exceed the limit of {limit}")]
    TooManyAmbiguousPhases { count: usize, limit: usize },

    /// The harness itself is malformed.
    #[error("invalid harness: {0}")]
    InvalidHarness(String),

    /// A serialization violates program order or read/write adjacency.
    #[error("invalid serialization: {0}")]
    InvalidSerialization(String),
}
