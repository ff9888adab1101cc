//! Named test scenarios: which harnesses run, and under which driver.
//!
//! The fixed harness lists are randomly generated two-key, three-node
//! programs that proved interesting in earlier campaigns.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zoocheck_oracle::{DEFAULT_MAX_AMBIGUOUS_PHASES, Harness, Phase, RandomHarnessGenerator};

use crate::engine::Driver;
use crate::error::{Result, SimError};
use crate::rng::SimRng;

/// Keys used by every catalog harness.
pub const CATALOG_KEYS: usize = 2;

/// Nodes used by every catalog harness.
pub const CATALOG_NODES: usize = 3;

// ============================================================================
// Scenario Types
// ============================================================================

/// Predefined scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioType {
    /// The default harness under random start/stop events.
    #[default]
    Baseline,
    /// Twelve three-phase harnesses under random start/stop events.
    BaselineHarnessShort,
    /// Six five-phase harnesses under random start/stop events.
    BaselineHarnessLong,
    /// The default harness under the per-phase fault budget.
    Paper,
    /// The default harness against minimal quorums.
    Random,
    /// Random harnesses under the per-phase fault budget.
    RandomHarness,
}

impl ScenarioType {
    /// Returns the identifier used on the command line and in config files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::BaselineHarnessShort => "baseline-harness-short",
            Self::BaselineHarnessLong => "baseline-harness-long",
            Self::Paper => "paper",
            Self::Random => "random",
            Self::RandomHarness => "random-harness",
        }
    }

    /// Returns a description of what this scenario tests.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Baseline => {
                "Two writes and an empty phase while servers start and crash at random times"
            }
            Self::BaselineHarnessShort => {
                "Fixed three-phase harnesses mixing conditional and unconditional writes, random start/stop"
            }
            Self::BaselineHarnessLong => {
                "Fixed five-phase harnesses with chained conditional writes, random start/stop"
            }
            Self::Paper => "Fault budget spread uniformly over phases, crashes during requests",
            Self::Random => "Minimal quorums per phase with up to quorum - 1 crashes",
            Self::RandomHarness => {
                "Harnesses drawn from the full enumeration, fault budget spread over phases"
            }
        }
    }

    /// Returns all scenario types.
    pub fn all() -> &'static [ScenarioType] {
        &[
            Self::Baseline,
            Self::BaselineHarnessShort,
            Self::BaselineHarnessLong,
            Self::Paper,
            Self::Random,
            Self::RandomHarness,
        ]
    }

    /// Returns the driver that injects the faults.
    pub fn driver(&self) -> Driver {
        match self {
            Self::Baseline | Self::BaselineHarnessShort | Self::BaselineHarnessLong => {
                Driver::Baseline
            }
            Self::Paper | Self::RandomHarness => Driver::Paper,
            Self::Random => Driver::Quorum,
        }
    }

    /// Returns the harnesses to run, in order.
    ///
    /// Only [`ScenarioType::RandomHarness`] uses `shape` and `rng`: it draws
    /// `shape.count` harnesses from the enumeration of the given shape.
    pub fn harnesses(&self, shape: &HarnessShape, rng: &mut SimRng) -> Result<Vec<Arc<Harness>>> {
        let programs = match self {
            Self::Baseline | Self::Paper | Self::Random => vec![default_harness()],
            Self::BaselineHarnessShort => short_harnesses(),
            Self::BaselineHarnessLong => long_harnesses(),
            Self::RandomHarness => {
                let generator = RandomHarnessGenerator::new(
                    CATALOG_KEYS,
                    CATALOG_NODES,
                    shape.requests,
                    shape.phases,
                )?;
                let drawn = generator.sample(shape.count, rng);
                if drawn.is_empty() && shape.count > 0 {
                    return Err(SimError::Config(format!(
                        "no harness has {} requests in {} phases",
                        shape.requests, shape.phases
                    )));
                }
                drawn.iter().map(|harness| harness.phases().to_vec()).collect()
            }
        };

        programs
            .into_iter()
            .map(|phases| {
                let harness = Harness::new(phases, CATALOG_KEYS)?
                    .with_max_ambiguous_phases(shape.max_ambiguous_phases);
                Ok(Arc::new(harness))
            })
            .collect()
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioType {
    type Err = SimError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|scenario| scenario.name() == s)
            .copied()
            .ok_or_else(|| SimError::Config(format!("unknown scenario: {s}")))
    }
}

/// Shape of generated harnesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessShape {
    pub requests: usize,
    pub phases: usize,
    /// Harnesses to draw.
    pub count: usize,
    pub max_ambiguous_phases: usize,
}

impl Default for HarnessShape {
    fn default() -> Self {
        Self {
            requests: 0,
            phases: 3,
            count: 1,
            max_ambiguous_phases: DEFAULT_MAX_AMBIGUOUS_PHASES,
        }
    }
}

// ============================================================================
// Harness Catalog
// ============================================================================

fn uw(node: usize, key: usize, value: i64) -> Phase {
    Phase::UnconditionalWrite { node, key, value }
}

fn cw(node: usize, read_key: usize, expected: i64, write_key: usize, value: i64) -> Phase {
    Phase::ConditionalWrite {
        node,
        read_key,
        expected,
        write_key,
        value,
    }
}

const EMPTY: Phase = Phase::Empty;

/// Two writes from different nodes around an empty phase.
pub fn default_harness() -> Vec<Phase> {
    vec![uw(1, 0, 101), EMPTY, uw(2, 1, 302)]
}

fn short_harnesses() -> Vec<Vec<Phase>> {
    vec![
        vec![uw(0, 0, 100), EMPTY, cw(1, 0, 0, 1, 201)],
        vec![uw(0, 1, 100), EMPTY, uw(0, 1, 200)],
        vec![uw(2, 0, 102), uw(1, 0, 201), EMPTY],
        vec![EMPTY, cw(1, 0, 0, 1, 101), cw(1, 0, 0, 0, 201)],
        vec![cw(0, 1, 0, 0, 100), uw(1, 0, 201), EMPTY],
        vec![uw(2, 0, 102), uw(1, 1, 201), EMPTY],
        vec![cw(1, 1, 0, 1, 101), EMPTY, cw(0, 0, 0, 0, 200)],
        vec![cw(0, 1, 0, 0, 100), EMPTY, cw(2, 1, 0, 0, 202)],
        vec![uw(2, 0, 102), cw(0, 0, 102, 0, 200), EMPTY],
        vec![EMPTY, uw(1, 1, 101), cw(2, 0, 0, 1, 202)],
        vec![EMPTY, uw(0, 1, 100), cw(1, 0, 0, 1, 201)],
        vec![cw(2, 1, 0, 1, 102), EMPTY, cw(0, 0, 0, 0, 200)],
    ]
}

fn long_harnesses() -> Vec<Vec<Phase>> {
    vec![
        vec![
            cw(0, 1, 0, 0, 100),
            cw(1, 0, 0, 0, 201),
            cw(2, 0, 100, 0, 302),
            EMPTY,
            cw(2, 0, 100, 0, 402),
        ],
        vec![
            uw(0, 1, 100),
            cw(0, 1, 100, 0, 200),
            cw(2, 0, 0, 1, 302),
            cw(0, 0, 200, 1, 400),
            EMPTY,
        ],
        vec![
            cw(2, 1, 0, 1, 102),
            EMPTY,
            cw(0, 1, 0, 0, 200),
            cw(0, 1, 0, 1, 300),
            cw(0, 1, 102, 1, 400),
        ],
        vec![
            cw(2, 0, 0, 0, 102),
            cw(2, 1, 0, 0, 202),
            cw(1, 1, 0, 1, 301),
            uw(1, 1, 401),
            EMPTY,
        ],
        vec![
            EMPTY,
            uw(2, 1, 102),
            cw(1, 1, 0, 0, 201),
            cw(1, 1, 102, 0, 301),
            cw(1, 1, 0, 0, 401),
        ],
        vec![
            cw(2, 0, 0, 0, 102),
            uw(0, 0, 200),
            cw(1, 1, 0, 0, 301),
            EMPTY,
            cw(2, 0, 0, 1, 402),
        ],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioType::all() {
            assert_eq!(scenario.name().parse::<ScenarioType>().unwrap(), *scenario);
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert!("divergence".parse::<ScenarioType>().is_err());
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&ScenarioType::BaselineHarnessShort).unwrap();
        assert_eq!(json, "\"baseline-harness-short\"");
    }

    #[test_case(ScenarioType::Baseline, 1, 3)]
    #[test_case(ScenarioType::BaselineHarnessShort, 12, 3)]
    #[test_case(ScenarioType::BaselineHarnessLong, 6, 5)]
    #[test_case(ScenarioType::Random, 1, 3)]
    fn test_catalog_sizes(scenario: ScenarioType, harnesses: usize, phases: usize) {
        let mut rng = SimRng::new(0);
        let list = scenario.harnesses(&HarnessShape::default(), &mut rng).unwrap();
        assert_eq!(list.len(), harnesses);
        for harness in &list {
            assert_eq!(harness.len(), phases);
            assert!(harness.max_node().is_some_and(|node| node < CATALOG_NODES));
        }
    }

    #[test]
    fn test_random_harness_draws_requested_shape() {
        let shape = HarnessShape {
            requests: 2,
            phases: 3,
            count: 4,
            ..HarnessShape::default()
        };
        let mut rng = SimRng::new(17);
        let list = ScenarioType::RandomHarness.harnesses(&shape, &mut rng).unwrap();
        assert_eq!(list.len(), 4);
        for harness in &list {
            assert_eq!(harness.len(), 3);
            assert_eq!(harness.phases().iter().filter(|p| p.is_request()).count(), 2);
        }
    }

    #[test]
    fn test_random_harness_rejects_impossible_shape() {
        let shape = HarnessShape {
            requests: 4,
            phases: 3,
            ..HarnessShape::default()
        };
        let mut rng = SimRng::new(1);
        assert!(ScenarioType::RandomHarness.harnesses(&shape, &mut rng).is_err());
    }

    #[test]
    fn test_drivers() {
        assert_eq!(ScenarioType::BaselineHarnessLong.driver(), Driver::Baseline);
        assert_eq!(ScenarioType::RandomHarness.driver(), Driver::Paper);
        assert_eq!(ScenarioType::Random.driver(), Driver::Quorum);
    }
}
