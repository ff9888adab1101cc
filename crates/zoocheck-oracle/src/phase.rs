//! The phase model: one scheduled operation (or no-op) of a test program.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the node that issues a phase.
pub type NodeId = usize;

/// Index of a key in the harness key list (`/key0`, `/key1`, ...).
pub type KeyIndex = usize;

/// Returns the path of the key with the given index.
pub fn key_path(key: KeyIndex) -> String {
    format!("/key{key}")
}

/// One step of a harness program.
///
/// `VirtualWrite`, the write side of a conditional write, is not a variant
/// here: it only exists inside the serialization search and is derived from
/// its `ConditionalWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Phase {
    /// No-op placeholder. Keeps phase indices and timing slots stable.
    Empty,

    /// Writes `value` to `key` regardless of its current value.
    UnconditionalWrite {
        node: NodeId,
        key: KeyIndex,
        value: i64,
    },

    /// Writes `value` to `write_key` iff `read_key` currently holds `expected`.
    ConditionalWrite {
        node: NodeId,
        read_key: KeyIndex,
        expected: i64,
        write_key: KeyIndex,
        value: i64,
    },
}

impl Phase {
    /// Returns the issuing node, or `None` for an empty phase.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Phase::Empty => None,
            Phase::UnconditionalWrite { node, .. } | Phase::ConditionalWrite { node, .. } => {
                Some(*node)
            }
        }
    }

    /// Returns true if the phase issues a request against the ensemble.
    pub fn is_request(&self) -> bool {
        !matches!(self, Phase::Empty)
    }

    /// Returns the value this phase writes, if it writes at all.
    pub fn write_value(&self) -> Option<i64> {
        match self {
            Phase::Empty => None,
            Phase::UnconditionalWrite { value, .. } | Phase::ConditionalWrite { value, .. } => {
                Some(*value)
            }
        }
    }

    /// Returns the highest key index this phase touches.
    pub(crate) fn max_key(&self) -> Option<KeyIndex> {
        match self {
            Phase::Empty => None,
            Phase::UnconditionalWrite { key, .. } => Some(*key),
            Phase::ConditionalWrite {
                read_key,
                write_key,
                ..
            } => Some((*read_key).max(*write_key)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Empty => write!(f, "Empty"),
            Phase::UnconditionalWrite { node, key, value } => {
                write!(f, "Write(node {node}, {} := {value})", key_path(*key))
            }
            Phase::ConditionalWrite {
                node,
                read_key,
                expected,
                write_key,
                value,
            } => write!(
                f,
                "CondWrite(node {node}, if {} == {expected} then {} := {value})",
                key_path(*read_key),
                key_path(*write_key)
            ),
        }
    }
}
