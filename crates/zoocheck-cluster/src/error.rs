//! Error types for ensemble management.

use thiserror::Error;
use zoocheck_oracle::ConsistencyViolation;

use crate::request::{ConnectionState, Status};

/// Ensemble management errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server id outside the ensemble.
    #[error("Server {0} not found")]
    ServerNotFound(usize),

    /// Clients exist only between `start_ensemble` and `stop_ensemble`.
    #[error("Ensemble not started")]
    NotStarted,

    /// The allocator ran past the top of the port range.
    #[error("Port range exhausted (next port would exceed {0})")]
    PortsExhausted(u16),

    /// No server listens on the endpoint a client was pointed at.
    #[error("Unknown server endpoint: {0}")]
    UnknownEndpoint(String),

    /// Clients did not reach the expected state in time.
    #[error("Clients of servers {servers:?} did not become {expected:?}")]
    ClientStateTimeout {
        servers: Vec<usize>,
        expected: ConnectionState,
    },

    /// No client/server assignment keeps every requested server reachable.
    #[error("Cannot reassign clients to servers; unreachable pairs (server, client): {unreachable:?}")]
    NoViableAssignment { unreachable: Vec<(usize, usize)> },

    /// A verification read failed twice.
    #[error("Reading {key} through server {server} failed with {status:?}")]
    ReadFailed {
        server: usize,
        key: String,
        status: Status,
    },

    /// A key held something other than a decimal integer.
    #[error("Value of {key} on server {server} is not an integer: {raw:?}")]
    MalformedValue {
        server: usize,
        key: String,
        raw: String,
    },

    /// The ensemble has no leader to send a request to.
    #[error("No leader elected")]
    NoLeader,

    /// The observed state violates sequential consistency.
    #[error("Consistency violation: {0}")]
    Violation(#[from] ConsistencyViolation),
}

impl ClusterError {
    /// True if this error reports the property under test, not the harness.
    pub fn is_assertion(&self) -> bool {
        matches!(self, ClusterError::Violation(_))
    }

    /// True if the ensemble cannot be kept reachable at all.
    pub fn is_fatal_matching(&self) -> bool {
        matches!(self, ClusterError::NoViableAssignment { .. })
    }
}

/// Result type for ensemble operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
