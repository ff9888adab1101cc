//! Interfaces to the service under test.
//!
//! The replicated service itself is a black box. An [`EnsembleBackend`]
//! produces one [`NodeController`] per server slot and one [`ServiceClient`]
//! per client slot; the ensemble only ever talks to the service through them.

use std::future::Future;

use tokio::sync::oneshot;

use crate::Result;
use crate::config::{EnsembleConfig, NodeConfig};
use crate::request::{Completion, ConnectionState, Operation};

/// Lifecycle control of one server process.
pub trait NodeController: Send {
    /// Returns the node ID.
    fn id(&self) -> usize;

    /// Starts the server from its config.
    fn start(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Stops the server. The ensemble abandons the wait after its join
    /// timeout.
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Asks the server whether it currently leads the ensemble.
    fn is_leader(&mut self) -> impl Future<Output = bool> + Send;

    /// Returns true while the server runs.
    fn is_running(&mut self) -> bool;

    /// Wipes the server's data between runs.
    fn clean(&mut self) -> Result<()>;

    /// Releases everything the node owns.
    fn tear_down(&mut self) -> Result<()>;
}

/// One client session of the service.
///
/// Completions are delivered through the returned channel. If the client
/// loses track of a request it drops the sender, which callers must treat as
/// an ambiguous outcome.
pub trait ServiceClient: Send + Sync {
    /// Submits an operation.
    fn submit(&self, op: Operation) -> oneshot::Receiver<Completion>;

    /// Returns the session state.
    fn connection_state(&self) -> ConnectionState;

    /// Points the session at another server.
    fn update_server_endpoint(&self, endpoint: &str) -> Result<()>;

    /// Closes the session.
    fn close(&self);
}

/// Factory for the nodes and clients of one ensemble.
pub trait EnsembleBackend: Send + Sync {
    type Node: NodeController;
    type Client: ServiceClient;

    /// Creates the controller of one node. The node is not started.
    fn create_node(&self, ensemble: &EnsembleConfig, node: &NodeConfig) -> Result<Self::Node>;

    /// Opens client session `id` against `endpoint`.
    fn connect(&self, id: usize, endpoint: &str) -> Result<Self::Client>;
}
