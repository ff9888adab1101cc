//! Serialization search over expanded phases.
//!
//! A set of executed phases is expanded into per-node lanes of [`Unit`]s.
//! An unconditional write becomes one unit; a conditional write becomes its
//! read form immediately followed by a virtual write. The search places one
//! unit per depth, taking the next unit of some lane, and never separates a
//! read from its virtual write.
//!
//! Two reductions keep the search tractable without changing the result:
//!
//! - **Commuting blocks.** A block is a single write or a read plus its
//!   virtual write. When the block just placed and a candidate block belong
//!   to different nodes and do not conflict, only the order with the lower
//!   node first is explored. Every serialization is equivalent (same final
//!   state) to one that never places an independent block right after a
//!   higher-numbered node's block.
//! - **Visited configurations.** At block boundaries the remaining search
//!   depends only on the lane cursors, the last lane and the state, so a
//!   configuration seen before is not expanded again.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::phase::{KeyIndex, NodeId, Phase};
use crate::state::State;

// ============================================================================
// Serialization Steps
// ============================================================================

/// Which part of a phase a serialization step places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// An unconditional write.
    Write,
    /// The read form of a conditional write.
    Read,
    /// The write form of a conditional write.
    VirtualWrite,
}

/// One position of a serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    /// Index of the phase in the harness.
    pub phase: usize,
    /// Part of the phase placed at this position.
    pub kind: StepKind,
}

// ============================================================================
// Expanded Operations
// ============================================================================

/// An expanded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unit {
    Write {
        phase: usize,
        node: NodeId,
        key: KeyIndex,
        value: i64,
    },
    Read {
        phase: usize,
        node: NodeId,
        key: KeyIndex,
        expected: i64,
    },
    VirtualWrite {
        phase: usize,
        node: NodeId,
        key: KeyIndex,
        value: i64,
    },
}

impl Unit {
    fn node(&self) -> NodeId {
        match self {
            Unit::Write { node, .. } | Unit::Read { node, .. } | Unit::VirtualWrite { node, .. } => {
                *node
            }
        }
    }

    fn key(&self) -> KeyIndex {
        match self {
            Unit::Write { key, .. } | Unit::Read { key, .. } | Unit::VirtualWrite { key, .. } => {
                *key
            }
        }
    }

    /// Whether this unit writes, given whether the preceding condition held.
    ///
    /// Only a virtual write depends on the condition.
    pub(crate) fn is_write(&self, condition_held: bool) -> bool {
        match self {
            Unit::Write { .. } => true,
            Unit::Read { .. } => false,
            Unit::VirtualWrite { .. } => condition_held,
        }
    }

    /// Whether this unit writes in at least one serialization.
    fn may_write(&self) -> bool {
        self.is_write(true)
    }

    /// Same key, at least one side a (potential) write.
    pub(crate) fn conflicts(&self, other: &Unit) -> bool {
        self.key() == other.key() && (self.may_write() || other.may_write())
    }

    fn step(&self) -> Step {
        match *self {
            Unit::Write { phase, .. } => Step {
                phase,
                kind: StepKind::Write,
            },
            Unit::Read { phase, .. } => Step {
                phase,
                kind: StepKind::Read,
            },
            Unit::VirtualWrite { phase, .. } => Step {
                phase,
                kind: StepKind::VirtualWrite,
            },
        }
    }
}

fn independent(a: &[Unit], b: &[Unit]) -> bool {
    a.iter().all(|x| b.iter().all(|y| !x.conflicts(y)))
}

/// Per-node lanes of expanded units, lanes ordered by ascending node id.
#[derive(Debug)]
pub(crate) struct Lanes {
    lanes: Vec<Vec<Unit>>,
    total: usize,
}

impl Lanes {
    /// Expands the given phases in index order. Empty phases vanish.
    pub(crate) fn expand(phases: &[Phase], executed: &BTreeSet<usize>) -> Self {
        let mut by_node: BTreeMap<NodeId, Vec<Unit>> = BTreeMap::new();
        for &phase in executed {
            match phases[phase] {
                Phase::Empty => {}
                Phase::UnconditionalWrite { node, key, value } => {
                    by_node.entry(node).or_default().push(Unit::Write {
                        phase,
                        node,
                        key,
                        value,
                    });
                }
                Phase::ConditionalWrite {
                    node,
                    read_key,
                    expected,
                    write_key,
                    value,
                } => {
                    let lane = by_node.entry(node).or_default();
                    lane.push(Unit::Read {
                        phase,
                        node,
                        key: read_key,
                        expected,
                    });
                    lane.push(Unit::VirtualWrite {
                        phase,
                        node,
                        key: write_key,
                        value,
                    });
                }
            }
        }

        let lanes: Vec<Vec<Unit>> = by_node.into_values().collect();
        let total = lanes.iter().map(Vec::len).sum();
        Self { lanes, total }
    }

    /// The block starting at `cursor`.
    fn block_at(&self, lane: usize, cursor: usize) -> &[Unit] {
        let units = &self.lanes[lane];
        match units[cursor] {
            Unit::Read { .. } => &units[cursor..cursor + 2],
            _ => &units[cursor..=cursor],
        }
    }

    /// The block ending right before `cursor`.
    fn block_before(&self, lane: usize, cursor: usize) -> &[Unit] {
        let units = &self.lanes[lane];
        match units[cursor - 1] {
            Unit::VirtualWrite { .. } => &units[cursor - 2..cursor],
            _ => &units[cursor - 1..cursor],
        }
    }

    /// True if the last unit placed on `lane` is a read awaiting its write.
    fn awaits_virtual_write(&self, lane: usize, cursor: usize) -> bool {
        matches!(self.lanes[lane][cursor - 1], Unit::Read { .. })
    }
}

// ============================================================================
// Search Frames
// ============================================================================

/// Immutable snapshot of the search at one depth.
#[derive(Debug, Clone)]
struct Frame {
    state: State,
    cursors: Vec<usize>,
    last: Option<usize>,
    /// Whether the condition of the most recent read held.
    held: bool,
}

impl Frame {
    fn root(lanes: &Lanes, num_keys: usize) -> Self {
        Self {
            state: State::zero(num_keys),
            cursors: vec![0; lanes.lanes.len()],
            last: None,
            held: false,
        }
    }

    /// Applies one unit and returns the snapshot of the next depth.
    fn advance(&self, unit: &Unit, lane: usize) -> Self {
        let mut next = self.clone();
        next.cursors[lane] += 1;
        next.last = Some(lane);
        match *unit {
            Unit::Read { key, expected, .. } => {
                next.held = self.state.get(key) == expected;
            }
            Unit::Write { key, value, .. } | Unit::VirtualWrite { key, value, .. } => {
                if unit.is_write(self.held) {
                    next.state.set(key, value);
                }
            }
        }
        next
    }

    fn pending_lane(&self, lanes: &Lanes) -> Option<usize> {
        self.last
            .filter(|&lane| lanes.awaits_virtual_write(lane, self.cursors[lane]))
    }
}

// ============================================================================
// Explorer
// ============================================================================

type Configuration = (Vec<usize>, Option<usize>, State);

struct Explorer<'a> {
    lanes: &'a Lanes,
    frames: Vec<Frame>,
    path: Vec<Step>,
    visited: HashSet<Configuration>,
    found: BTreeMap<State, Vec<Step>>,
    leaves: u64,
}

/// Enumerates every final state of the lanes, each with one witness
/// serialization that produces it.
pub(crate) fn explore(lanes: &Lanes, num_keys: usize) -> BTreeMap<State, Vec<Step>> {
    let mut explorer = Explorer {
        lanes,
        frames: vec![Frame::root(lanes, num_keys)],
        path: Vec::with_capacity(lanes.total),
        visited: HashSet::new(),
        found: BTreeMap::new(),
        leaves: 0,
    };
    explorer.descend(0);

    debug!(
        units = lanes.total,
        leaves = explorer.leaves,
        configurations = explorer.visited.len(),
        states = explorer.found.len(),
        "explored serializations"
    );
    explorer.found
}

impl Explorer<'_> {
    fn descend(&mut self, depth: usize) {
        if depth == self.lanes.total {
            self.leaves += 1;
            let state = &self.frames[depth].state;
            if !self.found.contains_key(state) {
                self.found.insert(state.clone(), self.path.clone());
            }
            return;
        }

        for lane in self.candidates(depth) {
            let frame = &self.frames[depth];
            let unit = self.lanes.lanes[lane][frame.cursors[lane]];
            let next = frame.advance(&unit, lane);

            self.frames.push(next);
            self.path.push(unit.step());
            self.descend(depth + 1);
            self.path.pop();
            self.frames.pop();
        }
    }

    fn candidates(&mut self, depth: usize) -> Vec<usize> {
        let frame = &self.frames[depth];
        if let Some(lane) = frame.pending_lane(self.lanes) {
            return vec![lane];
        }

        let configuration = (frame.cursors.clone(), frame.last, frame.state.clone());
        if !self.visited.insert(configuration) {
            return Vec::new();
        }

        let lanes = self.lanes;
        (0..lanes.lanes.len())
            .filter(|&lane| frame.cursors[lane] < lanes.lanes[lane].len())
            .filter(|&lane| match frame.last {
                Some(last) if lane < last => !independent(
                    lanes.block_at(lane, frame.cursors[lane]),
                    lanes.block_before(last, frame.cursors[last]),
                ),
                _ => true,
            })
            .collect()
    }
}

/// Replays a serialization, checking per-node order and read/write adjacency.
pub(crate) fn replay(lanes: &Lanes, num_keys: usize, steps: &[Step]) -> Result<State, String> {
    let mut frame = Frame::root(lanes, num_keys);

    for (position, step) in steps.iter().enumerate() {
        let lane = (0..lanes.lanes.len())
            .find(|&lane| {
                lanes.lanes[lane]
                    .get(frame.cursors[lane])
                    .is_some_and(|unit| unit.step() == *step)
            })
            .ok_or_else(|| {
                format!(
                    "position {position}: phase {} ({:?}) is not the next operation of its node",
                    step.phase, step.kind
                )
            })?;

        if let Some(pending) = frame.pending_lane(lanes) {
            if pending != lane {
                return Err(format!(
                    "position {position}: conditional write of node {} split from its write",
                    lanes.lanes[pending][0].node()
                ));
            }
        }

        let unit = lanes.lanes[lane][frame.cursors[lane]];
        frame = frame.advance(&unit, lane);
    }

    if steps.len() != lanes.total {
        return Err(format!(
            "serialization places {} of {} operations",
            steps.len(),
            lanes.total
        ));
    }
    Ok(frame.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all(phases: &[Phase]) -> BTreeSet<usize> {
        (0..phases.len()).collect()
    }

    /// Unpruned enumeration of every block interleaving.
    fn brute_force(lanes: &Lanes, num_keys: usize) -> BTreeSet<State> {
        fn go(lanes: &Lanes, frame: &Frame, out: &mut BTreeSet<State>) {
            if frame.cursors.iter().sum::<usize>() == lanes.total {
                out.insert(frame.state.clone());
                return;
            }
            for lane in 0..lanes.lanes.len() {
                let cursor = frame.cursors[lane];
                if cursor == lanes.lanes[lane].len() {
                    continue;
                }
                let mut next = frame.clone();
                for unit in lanes.block_at(lane, cursor) {
                    next = next.advance(unit, lane);
                }
                go(lanes, &next, out);
            }
        }

        let mut out = BTreeSet::new();
        go(lanes, &Frame::root(lanes, num_keys), &mut out);
        out
    }

    #[test]
    fn test_conflict_relation() {
        let write = Unit::Write {
            phase: 0,
            node: 0,
            key: 0,
            value: 1,
        };
        let read = Unit::Read {
            phase: 1,
            node: 1,
            key: 0,
            expected: 0,
        };
        let other_read = Unit::Read {
            phase: 2,
            node: 2,
            key: 0,
            expected: 5,
        };
        let virtual_write = Unit::VirtualWrite {
            phase: 1,
            node: 1,
            key: 1,
            value: 7,
        };

        assert!(write.conflicts(&read));
        assert!(!read.conflicts(&other_read));
        assert!(!write.conflicts(&virtual_write));
        assert!(!virtual_write.is_write(false));
        assert!(virtual_write.is_write(true));
        assert!(!read.is_write(true));
    }

    #[test]
    fn test_expand_drops_empty_and_pairs_conditional_writes() {
        let phases = vec![
            Phase::Empty,
            Phase::ConditionalWrite {
                node: 3,
                read_key: 0,
                expected: 0,
                write_key: 1,
                value: 9,
            },
            Phase::UnconditionalWrite {
                node: 1,
                key: 0,
                value: 4,
            },
        ];
        let lanes = Lanes::expand(&phases, &all(&phases));

        assert_eq!(lanes.total, 3);
        assert_eq!(lanes.lanes.len(), 2);
        assert_eq!(lanes.lanes[0][0].node(), 1);
        assert!(matches!(lanes.lanes[1][0], Unit::Read { phase: 1, .. }));
        assert!(matches!(lanes.lanes[1][1], Unit::VirtualWrite { phase: 1, .. }));
    }

    #[test]
    fn test_witnesses_keep_virtual_write_adjacent() {
        let phases = vec![
            Phase::ConditionalWrite {
                node: 0,
                read_key: 1,
                expected: 0,
                write_key: 0,
                value: 10,
            },
            Phase::UnconditionalWrite {
                node: 1,
                key: 1,
                value: 11,
            },
            Phase::ConditionalWrite {
                node: 2,
                read_key: 0,
                expected: 10,
                write_key: 1,
                value: 12,
            },
        ];
        let lanes = Lanes::expand(&phases, &all(&phases));

        for steps in explore(&lanes, 2).values() {
            for pair in steps.windows(2) {
                if pair[0].kind == StepKind::Read {
                    assert_eq!(pair[1].kind, StepKind::VirtualWrite);
                    assert_eq!(pair[1].phase, pair[0].phase);
                }
            }
        }
    }

    #[test]
    fn test_replay_rejects_split_conditional_write() {
        let phases = vec![
            Phase::ConditionalWrite {
                node: 0,
                read_key: 0,
                expected: 0,
                write_key: 1,
                value: 1,
            },
            Phase::UnconditionalWrite {
                node: 1,
                key: 0,
                value: 2,
            },
        ];
        let lanes = Lanes::expand(&phases, &all(&phases));
        let split = [
            Step {
                phase: 0,
                kind: StepKind::Read,
            },
            Step {
                phase: 1,
                kind: StepKind::Write,
            },
            Step {
                phase: 0,
                kind: StepKind::VirtualWrite,
            },
        ];

        assert!(replay(&lanes, 2, &split).is_err());
    }

    #[test]
    fn test_replay_rejects_program_order_violation() {
        let phases = vec![
            Phase::UnconditionalWrite {
                node: 0,
                key: 0,
                value: 1,
            },
            Phase::UnconditionalWrite {
                node: 0,
                key: 0,
                value: 2,
            },
        ];
        let lanes = Lanes::expand(&phases, &all(&phases));
        let reversed = [
            Step {
                phase: 1,
                kind: StepKind::Write,
            },
            Step {
                phase: 0,
                kind: StepKind::Write,
            },
        ];

        assert!(replay(&lanes, 1, &reversed).is_err());
        assert!(replay(&lanes, 1, &reversed[..1]).is_err());
    }

    fn arb_phase() -> impl Strategy<Value = Phase> {
        prop_oneof![
            Just(Phase::Empty),
            (0usize..3, 0usize..2, 1i64..4)
                .prop_map(|(node, key, value)| Phase::UnconditionalWrite { node, key, value }),
            (0usize..3, 0usize..2, 0i64..4, 0usize..2, 1i64..4).prop_map(
                |(node, read_key, expected, write_key, value)| Phase::ConditionalWrite {
                    node,
                    read_key,
                    expected,
                    write_key,
                    value,
                }
            ),
        ]
    }

    proptest! {
        #[test]
        fn prop_reduced_search_matches_brute_force(phases in prop::collection::vec(arb_phase(), 0..7)) {
            let lanes = Lanes::expand(&phases, &all(&phases));
            let found = explore(&lanes, 2);

            let states: BTreeSet<State> = found.keys().cloned().collect();
            prop_assert_eq!(states, brute_force(&lanes, 2));

            for (state, steps) in &found {
                prop_assert_eq!(&replay(&lanes, 2, steps).unwrap(), state);
            }
        }
    }
}
