//! Ensemble orchestration for zoocheck.
//!
//! Drives a replicated coordination service through its lifecycle while a
//! scenario injects faults:
//! - Node controllers start, stop and crash servers
//! - One client per server slot, re-matched to servers when partitions leave
//!   a server without a reachable client
//! - Verification reads every key from every server and checks the result
//!   against the oracle's legal states
//!
//! The service is reached only through [`EnsembleBackend`];
//! [`MemoryBackend`] simulates a quorum-replicated register store in process.

pub mod backend;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod matching;
pub mod memory;
pub mod ports;
pub mod request;

pub use backend::{EnsembleBackend, NodeController, ServiceClient};
pub use config::{EnsembleConfig, EnsembleTiming, NodeConfig, majority};
pub use ensemble::Ensemble;
pub use error::{ClusterError, Result};
pub use matching::{Assignment, Reachability};
pub use memory::{MemoryBackend, MemoryClient, MemoryNode};
pub use ports::{DEFAULT_BASE_PORT, PortAllocator};
pub use request::{Completion, ConnectionState, Operation, RequestOutcome, Status};
