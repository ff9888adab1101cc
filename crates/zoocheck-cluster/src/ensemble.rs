//! Ensemble controller.
//!
//! Owns one node controller and one client per server slot. Client `i`
//! initially talks to server `i`; when a client cannot reach the server it is
//! responsible for, the client/server [`Assignment`] is re-derived from the
//! pairs observed to work.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use zoocheck_oracle::{ConsistencyProperty, State, key_path};

use crate::backend::{EnsembleBackend, NodeController, ServiceClient};
use crate::config::{EnsembleConfig, EnsembleTiming};
use crate::matching::{Assignment, Reachability};
use crate::request::{Completion, ConnectionState, Operation, Status};
use crate::{ClusterError, Result};

/// How long a verification read may take before it counts as failed.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A replicated ensemble under test.
pub struct Ensemble<B: EnsembleBackend> {
    backend: B,
    config: EnsembleConfig,
    nodes: Vec<B::Node>,
    clients: Vec<B::Client>,
    assignment: Assignment,
}

impl<B: EnsembleBackend> Ensemble<B> {
    /// Creates an ensemble. Call [`Ensemble::init`] before starting it.
    pub fn new(backend: B, config: EnsembleConfig) -> Self {
        Self {
            backend,
            config,
            nodes: Vec::new(),
            clients: Vec::new(),
            assignment: Assignment::identity(0),
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn total_servers(&self) -> usize {
        self.config.total_servers()
    }

    pub fn quorum(&self) -> usize {
        self.config.quorum
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current client/server assignment. Empty while the ensemble is stopped.
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Creates the node controllers. Nothing is started.
    pub fn init(&mut self) -> Result<()> {
        if !self.nodes.is_empty() {
            return Ok(());
        }
        for node in &self.config.nodes {
            self.nodes.push(self.backend.create_node(&self.config, node)?);
        }
        info!(servers = self.nodes.len(), quorum = self.config.quorum, "ensemble initialized");
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts every server, opens client `i` against server `i` and waits
    /// until every client is connected.
    pub async fn start_ensemble(&mut self) -> Result<()> {
        self.init()?;
        self.clients.clear();
        for id in 0..self.nodes.len() {
            self.start_single(id).await?;
            let endpoint = self.config.nodes[id].endpoint();
            self.clients.push(self.backend.connect(id, &endpoint)?);
        }
        self.assignment = Assignment::identity(self.clients.len());

        let all: Vec<usize> = (0..self.total_servers()).collect();
        self.wait_for_clients(ConnectionState::Connected, &all).await
    }

    /// Starts `ids` and waits until their clients are connected.
    pub async fn start_servers(&mut self, ids: &[usize]) -> Result<()> {
        info!(servers = ?ids, "starting servers");
        for &id in ids {
            self.start_single(id).await?;
        }
        self.wait_for_clients(ConnectionState::Connected, ids).await
    }

    /// Stops `ids` and waits until their clients notice.
    pub async fn stop_servers(&mut self, ids: &[usize]) -> Result<()> {
        info!(servers = ?ids, "stopping servers");
        for &id in ids {
            self.shutdown_single(id).await?;
        }
        self.wait_for_clients(ConnectionState::Connecting, ids).await
    }

    /// Stops `ids` without waiting for the clients to notice.
    pub async fn crash_servers(&mut self, ids: &[usize]) -> Result<()> {
        info!(servers = ?ids, "crashing servers");
        for &id in ids {
            self.shutdown_single(id).await?;
        }
        Ok(())
    }

    pub async fn start_all_servers(&mut self) -> Result<()> {
        let all: Vec<usize> = (0..self.total_servers()).collect();
        self.start_servers(&all).await
    }

    pub async fn stop_all_servers(&mut self) -> Result<()> {
        let all: Vec<usize> = (0..self.total_servers()).collect();
        self.stop_servers(&all).await
    }

    async fn start_single(&mut self, id: usize) -> Result<()> {
        let node = self.node_mut(id)?;
        if !node.is_running() {
            node.start().await?;
        }
        Ok(())
    }

    /// Stops one server, giving up after the join timeout.
    async fn shutdown_single(&mut self, id: usize) -> Result<()> {
        let join_timeout = self.config.timing.join_timeout;
        let node = self.node_mut(id)?;
        match tokio::time::timeout(join_timeout, node.shutdown()).await {
            Ok(result) => result,
            Err(_) => {
                error!(server = id, timeout = ?join_timeout, "server did not terminate in time");
                Ok(())
            }
        }
    }

    fn node_mut(&mut self, id: usize) -> Result<&mut B::Node> {
        self.nodes.get_mut(id).ok_or(ClusterError::ServerNotFound(id))
    }

    /// Returns true if server `id` runs.
    pub fn is_running(&mut self, id: usize) -> bool {
        self.nodes.get_mut(id).is_some_and(NodeController::is_running)
    }

    pub fn total_running_servers(&mut self) -> usize {
        self.nodes.iter_mut().filter_map(|node| node.is_running().then_some(())).count()
    }

    /// Ids of the running servers, ascending.
    pub fn running_servers(&mut self) -> Vec<usize> {
        self.nodes
            .iter_mut()
            .enumerate()
            .filter_map(|(id, node)| node.is_running().then_some(id))
            .collect()
    }

    /// Returns the lowest id of a server that reports being the leader.
    pub async fn leader(&mut self) -> Result<usize> {
        for (id, node) in self.nodes.iter_mut().enumerate() {
            if node.is_leader().await {
                return Ok(id);
            }
        }
        Err(ClusterError::NoLeader)
    }

    /// Closes every client and stops and cleans every server.
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn stop_ensemble(&mut self) -> Result<()> {
        for client in &self.clients {
            client.close();
        }
        self.clients.clear();
        self.assignment = Assignment::identity(0);

        let mut first_error = None;
        for id in 0..self.nodes.len() {
            let stopped = match self.shutdown_single(id).await {
                Ok(()) => self.node_mut(id).and_then(|node| node.clean()),
                Err(e) => Err(e),
            };
            if let Err(e) = stopped {
                error!(server = id, error = %e, "failed to stop server");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Releases every node's state.
    pub fn tear_down(&mut self) -> Result<()> {
        let mut first_error = None;
        for node in &mut self.nodes {
            if let Err(e) = node.tear_down() {
                error!(server = node.id(), error = %e, "failed to tear down server");
                first_error.get_or_insert(e);
            }
        }
        info!("ensemble teardown complete");
        first_error.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends `op` through the client currently assigned to `server`.
    pub fn handle_request(&self, server: usize, op: Operation) -> Result<oneshot::Receiver<Completion>> {
        if self.clients.is_empty() {
            return Err(ClusterError::NotStarted);
        }
        if server >= self.clients.len() {
            return Err(ClusterError::ServerNotFound(server));
        }
        let client = &self.clients[self.assignment.client_for(server)];
        Ok(client.submit(op))
    }

    /// Reads `num_keys` keys from every server through its assigned client.
    pub async fn read_states(&mut self, num_keys: usize) -> Result<Vec<State>> {
        if self.clients.is_empty() {
            return Err(ClusterError::NotStarted);
        }

        let clients = &self.clients;
        let mut states = Vec::with_capacity(clients.len());
        for server in 0..clients.len() {
            let client = &clients[self.assignment.client_for(server)];
            let mut values = Vec::with_capacity(num_keys);
            for key in 0..num_keys {
                values.push(read_key(client, server, &key_path(key)).await?);
            }
            states.push(State::from_values(values));
        }
        Ok(states)
    }

    /// Reads every server's state and checks it against `property`.
    pub async fn check_property(&mut self, property: &ConsistencyProperty, num_keys: usize) -> Result<()> {
        let states = self.read_states(num_keys).await?;
        debug!(states = ?states, "observed server states");
        property.check(&states)?;
        Ok(())
    }

    // ========================================================================
    // Client connectivity
    // ========================================================================

    /// Waits until the clients of `servers` reach `expected`, reassigning
    /// clients while some server cannot be reached.
    async fn wait_for_clients(&mut self, expected: ConnectionState, servers: &[usize]) -> Result<()> {
        let timing = self.config.timing;
        let mut pending = poll_clients(&self.clients, &self.assignment, timing, expected, servers).await;
        if pending.is_empty() {
            return Ok(());
        }
        if expected != ConnectionState::Connected {
            error!(
                servers = ?pending,
                expected = ?expected,
                attempts = timing.poll_attempts,
                "clients did not reach the expected state in time"
            );
            return Err(ClusterError::ClientStateTimeout {
                servers: pending,
                expected,
            });
        }

        let mut reach = Reachability::all(self.total_servers());
        while !pending.is_empty() {
            let client_states: Vec<ConnectionState> = pending
                .iter()
                .map(|&server| self.clients[self.assignment.client_for(server)].connection_state())
                .collect();
            warn!(
                servers = ?pending,
                client_states = ?client_states,
                "clients could not connect to their servers"
            );

            for &server in &pending {
                reach.mark_unreachable(server, self.assignment.client_for(server));
            }
            if !self.assignment.reassign(&reach, &pending) {
                let unreachable = reach.unreachable_pairs();
                error!(unreachable = ?unreachable, "cannot reassign clients to servers");
                return Err(ClusterError::NoViableAssignment { unreachable });
            }
            info!(assignment = ?self.assignment, "reassigned clients to servers");

            self.update_client_connections()?;
            pending = poll_clients(&self.clients, &self.assignment, timing, expected, servers).await;
        }
        Ok(())
    }

    fn update_client_connections(&self) -> Result<()> {
        for (client_id, client) in self.clients.iter().enumerate() {
            let server = self.assignment.server_for(client_id);
            client.update_server_endpoint(&self.config.nodes[server].endpoint())?;
        }
        Ok(())
    }
}

/// Polls until the assigned client of every server in `servers` is in
/// `expected`. Returns the servers still missing it after the last attempt.
async fn poll_clients<C: ServiceClient>(
    clients: &[C],
    assignment: &Assignment,
    timing: EnsembleTiming,
    expected: ConnectionState,
    servers: &[usize],
) -> Vec<usize> {
    let mut pending = servers.to_vec();
    for _ in 0..timing.poll_attempts {
        if pending.is_empty() {
            break;
        }
        tokio::time::sleep(timing.poll_interval).await;
        pending = servers
            .iter()
            .copied()
            .filter(|&server| clients[assignment.client_for(server)].connection_state() != expected)
            .collect();
    }
    pending
}

/// Reads one key as a decimal integer, retrying once.
async fn read_key<C: ServiceClient>(client: &C, server: usize, key: &str) -> Result<i64> {
    let mut status = Status::ConnectionLoss;
    for attempt in 0..2 {
        let receiver = client.submit(Operation::Read {
            path: key.to_string(),
        });
        let completion = match tokio::time::timeout(READ_TIMEOUT, receiver).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Completion::failed(Status::ConnectionLoss),
            Err(_) => Completion::failed(Status::OperationTimeout),
        };

        match (completion.status, completion.data) {
            (Status::Ok, Some(data)) => {
                let raw = String::from_utf8_lossy(&data).into_owned();
                return raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ClusterError::MalformedValue {
                        server,
                        key: key.to_string(),
                        raw,
                    });
            }
            (Status::Ok, None) => status = Status::NoNode,
            (failed, _) => status = failed,
        }
        if attempt == 0 {
            warn!(server, key, status = ?status, "read failed, retrying");
        }
    }
    Err(ClusterError::ReadFailed {
        server,
        key: key.to_string(),
        status,
    })
}
