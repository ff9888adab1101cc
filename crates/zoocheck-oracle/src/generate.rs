//! Exhaustive and random harness generation.
//!
//! Requests are enumerated like an odometer, last request fastest: each
//! request is first unconditional, then conditional on every earlier write to
//! its read key (or the initial value), then moves to the next write key and
//! finally to the next node. Every request sequence is emitted once per
//! placement of empty phases reached by repeatedly swapping the first request
//! that is followed by an empty phase.

use std::sync::Arc;

use rand::Rng;

use crate::OracleError;
use crate::harness::Harness;
use crate::phase::{KeyIndex, NodeId, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Unconditional,
    Conditional,
}

#[derive(Debug, Clone, Copy)]
struct Request {
    kind: RequestKind,
    node: NodeId,
    read_key: KeyIndex,
    /// Earlier request whose value the condition expects; `None` reads 0.
    reads_from: Option<usize>,
    write_key: KeyIndex,
}

impl Request {
    const FIRST: Request = Request {
        kind: RequestKind::Unconditional,
        node: 0,
        read_key: 0,
        reads_from: None,
        write_key: 0,
    };
}

/// Iterates over every harness of a given shape.
#[derive(Debug, Clone)]
pub struct HarnessIterator {
    num_keys: usize,
    num_nodes: usize,
    num_phases: usize,
    requests: Vec<Request>,
    phases: Vec<Phase>,
    exhausted: bool,
}

impl HarnessIterator {
    /// Creates an iterator over harnesses with `num_requests` requests issued
    /// by `num_nodes` nodes on `num_keys` keys, padded to `num_phases`.
    pub fn new(
        num_keys: usize,
        num_nodes: usize,
        num_requests: usize,
        num_phases: usize,
    ) -> Result<Self, OracleError> {
        if num_keys == 0 || num_nodes == 0 {
            return Err(OracleError::InvalidHarness(
                "harness generation needs at least one key and one node".to_string(),
            ));
        }
        if num_requests > num_phases {
            return Err(OracleError::InvalidHarness(format!(
                "{num_requests} requests do not fit in {num_phases} phases"
            )));
        }

        let requests = vec![Request::FIRST; num_requests];
        let phases = initial_phases(&requests, num_phases);
        Ok(Self {
            num_keys,
            num_nodes,
            num_phases,
            requests,
            phases,
            exhausted: false,
        })
    }

    fn advance_requests(&mut self) -> bool {
        for i in (0..self.requests.len()).rev() {
            let request = self.requests[i];
            if request.kind == RequestKind::Unconditional {
                self.requests[i] = Request {
                    kind: RequestKind::Conditional,
                    read_key: 0,
                    reads_from: None,
                    ..request
                };
                self.reset_after(i);
                return true;
            }

            let from = request.reads_from.map_or(0, |r| r + 1);
            if let Some(next) = (from..i).find(|&j| self.requests[j].write_key == request.read_key) {
                self.requests[i].reads_from = Some(next);
                self.reset_after(i);
                return true;
            }
            if request.read_key + 1 < self.num_keys {
                self.requests[i].read_key += 1;
                self.requests[i].reads_from = None;
                self.reset_after(i);
                return true;
            }
            if request.write_key + 1 < self.num_keys {
                self.requests[i].write_key += 1;
                self.requests[i].kind = RequestKind::Unconditional;
                self.reset_after(i);
                return true;
            }
            if request.node + 1 < self.num_nodes {
                self.requests[i] = Request {
                    node: request.node + 1,
                    ..Request::FIRST
                };
                self.reset_after(i);
                return true;
            }
        }
        false
    }

    fn reset_after(&mut self, index: usize) {
        for request in &mut self.requests[index + 1..] {
            *request = Request::FIRST;
        }
    }
}

fn initial_phases(requests: &[Request], num_phases: usize) -> Vec<Phase> {
    let mut phases = Vec::with_capacity(num_phases);
    for (i, request) in requests.iter().enumerate() {
        let value = 100 * (i as i64 + 1) + request.node as i64;
        let phase = match request.kind {
            RequestKind::Unconditional => Phase::UnconditionalWrite {
                node: request.node,
                key: request.write_key,
                value,
            },
            RequestKind::Conditional => Phase::ConditionalWrite {
                node: request.node,
                read_key: request.read_key,
                expected: request
                    .reads_from
                    .and_then(|j| phases.get(j).and_then(Phase::write_value))
                    .unwrap_or(0),
                write_key: request.write_key,
                value,
            },
        };
        phases.push(phase);
    }
    phases.resize(num_phases, Phase::Empty);
    phases
}

impl Iterator for HarnessIterator {
    type Item = Harness;

    fn next(&mut self) -> Option<Harness> {
        if self.exhausted {
            return None;
        }
        let harness = Harness::generated(self.phases.clone(), self.num_keys);

        let swap = (0..self.phases.len().saturating_sub(1))
            .find(|&i| self.phases[i].is_request() && !self.phases[i + 1].is_request());
        match swap {
            Some(i) => self.phases.swap(i, i + 1),
            None => {
                if self.advance_requests() {
                    self.phases = initial_phases(&self.requests, self.num_phases);
                } else {
                    self.exhausted = true;
                }
            }
        }
        Some(harness)
    }
}

/// Draws harnesses uniformly at random, with replacement, from the
/// enumeration of one shape.
///
/// Draws stream over the enumeration instead of storing it: every draw is a
/// reservoir of size one.
#[derive(Debug, Clone)]
pub struct RandomHarnessGenerator {
    enumeration: HarnessIterator,
}

impl RandomHarnessGenerator {
    /// Validates the shape.
    pub fn new(
        num_keys: usize,
        num_nodes: usize,
        num_requests: usize,
        num_phases: usize,
    ) -> Result<Self, OracleError> {
        Ok(Self {
            enumeration: HarnessIterator::new(num_keys, num_nodes, num_requests, num_phases)?,
        })
    }

    /// Draws `count` harnesses in one pass over the enumeration. Returns
    /// nothing if the shape has no harness.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Arc<Harness>> {
        if count == 0 {
            return Vec::new();
        }

        let mut draws: Vec<Option<Arc<Harness>>> = vec![None; count];
        for (seen, harness) in self.enumeration.clone().enumerate() {
            let harness = Arc::new(harness);
            for draw in &mut draws {
                // Keeps the harness with probability 1 / (seen + 1).
                if rng.gen_range(0..=seen) == 0 {
                    *draw = Some(Arc::clone(&harness));
                }
            }
        }
        draws.into_iter().flatten().collect()
    }
}
