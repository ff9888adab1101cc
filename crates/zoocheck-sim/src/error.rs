//! Error types for scenario runs.

use thiserror::Error;
use zoocheck_cluster::{ClusterError, Status};
use zoocheck_oracle::OracleError;

/// Errors that end a scenario run.
#[derive(Error, Debug)]
pub enum SimError {
    /// The ensemble failed or the consistency check did.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The oracle could not evaluate the run.
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// The request creating the keys did not succeed.
    #[error("Init request failed with {0:?}")]
    InitRequestFailed(Status),

    /// The init request never completed.
    #[error("Init request timed out")]
    InitRequestTimedOut,

    /// The harness issues requests from a node the ensemble does not have.
    #[error("Harness uses node {max_node} but the ensemble has {servers} servers")]
    HarnessTooWide { max_node: usize, servers: usize },

    /// Invalid run parameters.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SimError {
    /// True if the run found a consistency violation.
    pub fn is_assertion(&self) -> bool {
        matches!(self, SimError::Cluster(e) if e.is_assertion())
    }

    /// True if clients could not be matched to servers.
    pub fn is_fatal_matching(&self) -> bool {
        matches!(self, SimError::Cluster(e) if e.is_fatal_matching())
    }
}

/// Result type for scenario runs.
pub type Result<T> = std::result::Result<T, SimError>;
