//! # zoocheck-sim: fault-injection scenarios for replicated coordination services
//!
//! Runs harness programs against an [`Ensemble`](zoocheck_cluster::Ensemble)
//! while servers are crashed and restarted, then checks the replicas'
//! final state against the sequential-consistency oracle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        BatchRunner                            │
//! │   harness 0 ── worker 0 ─┐                                    │
//! │             └─ worker 1 ─┼── ScenarioEngine ── Ensemble        │
//! │   harness 1 ── ...       │        │                            │
//! │                          │   ┌────┴──────────────────────┐     │
//! │                          │   │ EventQueue   (baseline)   │     │
//! │                          │   │ FaultScheduler (paper,    │     │
//! │                          │   │ SubsetSampler    quorum)  │     │
//! │                          │   └───────────────────────────┘     │
//! │                          └── Harness oracle ── verdict        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use zoocheck_cluster::MemoryBackend;
//! use zoocheck_sim::{BatchConfig, BatchRunner, ScenarioType};
//!
//! let config = BatchConfig {
//!     scenario: ScenarioType::Paper,
//!     executions: 10,
//!     ..BatchConfig::default()
//! };
//! let runner = BatchRunner::new(config, |worker| MemoryBackend::new(worker as u64))?;
//! let results = runner.run().await?;
//! assert!(results.all_passed());
//! ```
//!
//! ## Key Concepts
//!
//! - **`SimRng`**: seedable generator; a run's seed reproduces its schedule
//! - **`FaultScheduler`**: uniform per-phase fault counts under a budget
//! - **`SubsetSampler`**: uniform server subsets
//! - **`EventQueue`**: time-ordered start/stop and phase events
//! - **`ScenarioEngine`**: one run, from ensemble start to verdict

#![allow(clippy::cast_precision_loss)] // Batch stats use f64 for rates
#![cfg_attr(test, allow(clippy::float_cmp))]

mod engine;
mod error;
mod event;
mod fault;
mod rng;
mod runner;
pub mod scenarios;
mod subset;

pub use engine::{Driver, EngineConfig, EngineState, RunOutcome, RunRecord, ScenarioEngine};
pub use error::{Result, SimError};
pub use event::{Event, EventId, EventKind, EventQueue};
pub use fault::{FaultPolicy, FaultScheduler};
pub use rng::SimRng;
pub use runner::{BatchConfig, BatchRecord, BatchResults, BatchRunner};
pub use scenarios::{HarnessShape, ScenarioType};
pub use subset::SubsetSampler;
