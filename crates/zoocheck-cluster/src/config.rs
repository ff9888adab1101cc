//! Ensemble configuration: ports, quorum and timing.

use std::time::Duration;

use crate::ports::PortAllocator;
use crate::{ClusterError, Result};

/// Smallest majority of `total` servers.
pub fn majority(total: usize) -> usize {
    total / 2 + 1
}

/// Configuration for a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Node ID (0-indexed).
    pub id: usize,

    /// Port clients connect to.
    pub client_port: u16,

    /// Port followers use to reach the leader.
    pub quorum_port: u16,

    /// Port used for leader election.
    pub election_port: u16,

    /// Address to bind to.
    pub bind_address: String,
}

impl NodeConfig {
    /// Address clients use to reach this node.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.bind_address, self.client_port)
    }
}

/// Polling and shutdown timing of an ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleTiming {
    /// Polls before a client is declared stuck.
    pub poll_attempts: u32,

    /// Delay before each poll.
    pub poll_interval: Duration,

    /// How long a node shutdown may take before it is logged and abandoned.
    pub join_timeout: Duration,
}

impl Default for EnsembleTiming {
    fn default() -> Self {
        Self {
            poll_attempts: 100,
            poll_interval: Duration::from_millis(100),
            join_timeout: Duration::from_millis(500),
        }
    }
}

/// Configuration for an ensemble.
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Servers needed to make progress.
    pub quorum: usize,

    /// Node configurations, indexed by id.
    pub nodes: Vec<NodeConfig>,

    /// Polling and shutdown timing.
    pub timing: EnsembleTiming,
}

impl EnsembleConfig {
    /// Allocates three ports per node from `ports`.
    pub fn allocate(total_servers: usize, ports: &PortAllocator) -> Result<Self> {
        if total_servers == 0 {
            return Err(ClusterError::Config(
                "an ensemble needs at least one server".to_string(),
            ));
        }

        let mut nodes = Vec::with_capacity(total_servers);
        for id in 0..total_servers {
            nodes.push(NodeConfig {
                id,
                client_port: ports.next_port()?,
                quorum_port: ports.next_port()?,
                election_port: ports.next_port()?,
                bind_address: "127.0.0.1".to_string(),
            });
        }

        Ok(Self {
            quorum: majority(total_servers),
            nodes,
            timing: EnsembleTiming::default(),
        })
    }

    /// Overrides the quorum size.
    pub fn with_quorum(mut self, quorum: usize) -> Result<Self> {
        if quorum == 0 || quorum > self.nodes.len() {
            return Err(ClusterError::Config(format!(
                "quorum {quorum} is not within 1..={}",
                self.nodes.len()
            )));
        }
        self.quorum = quorum;
        Ok(self)
    }

    /// Overrides the timing.
    pub fn with_timing(mut self, timing: EnsembleTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Returns the number of servers.
    pub fn total_servers(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the configuration for a specific node.
    pub fn node(&self, id: usize) -> Option<&NodeConfig> {
        self.nodes.get(id)
    }
}
