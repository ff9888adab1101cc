//! In-memory ensemble backend.
//!
//! A quorum-replicated register store standing in for real server processes.
//! All nodes and clients of one backend share a single world:
//!
//! - A write is committed to every running replica, and only while a quorum
//!   runs. Otherwise the client sees a connection loss.
//! - A replica that starts while a quorum runs (or whose start forms one)
//!   resyncs from the freshest running replica.
//! - The leader is the lowest running id while a quorum runs.
//! - A client is connected iff its server runs with a quorum and the pair is
//!   not partitioned.
//! - Completions arrive after a fixed latency. If the serving node stops or
//!   restarts in between, the completion is dropped and the write may or may
//!   not have reached the ensemble.
//!
//! The `ack_without_quorum` canary makes servers keep serving without a
//! quorum and acknowledge writes they only applied locally. The consistency
//! check must catch it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::backend::{EnsembleBackend, NodeController, ServiceClient};
use crate::config::{EnsembleConfig, NodeConfig};
use crate::request::{Completion, ConnectionState, Operation, Status};
use crate::{ClusterError, Result};

/// Default delay between a request and its completion.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Replica {
    running: bool,
    /// Bumped on every start and stop; in-flight requests compare it.
    incarnation: u64,
    zxid: u64,
    data: BTreeMap<String, Bytes>,
}

#[derive(Debug)]
struct World {
    quorum: usize,
    replicas: Vec<Replica>,
    endpoints: HashMap<String, usize>,
    /// Partitioned `(client, server)` pairs.
    unreachable: HashSet<(usize, usize)>,
    ack_without_quorum: bool,
    zxid: u64,
    rng: SmallRng,
}

impl World {
    fn running(&self) -> usize {
        self.replicas.iter().filter(|r| r.running).count()
    }

    fn has_quorum(&self) -> bool {
        self.running() >= self.quorum
    }

    fn leader(&self) -> Option<usize> {
        if !self.has_quorum() {
            return None;
        }
        self.replicas.iter().position(|r| r.running)
    }

    fn start(&mut self, id: usize) {
        let replica = &mut self.replicas[id];
        replica.running = true;
        replica.incarnation += 1;
        if self.has_quorum() {
            self.resync();
        }
    }

    fn stop(&mut self, id: usize) {
        let replica = &mut self.replicas[id];
        replica.running = false;
        replica.incarnation += 1;
    }

    /// Brings every running replica up to the freshest running one.
    fn resync(&mut self) {
        let freshest = self
            .replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| r.running)
            .max_by_key(|(id, r)| (r.zxid, std::cmp::Reverse(*id)))
            .map(|(id, _)| id);
        let Some(freshest) = freshest else {
            return;
        };

        let zxid = self.replicas[freshest].zxid;
        let data = self.replicas[freshest].data.clone();
        for (id, replica) in self.replicas.iter_mut().enumerate() {
            if replica.running && replica.zxid < zxid {
                debug!(replica = id, from = freshest, zxid, "resyncing replica");
                replica.data.clone_from(&data);
                replica.zxid = zxid;
            }
        }
    }

    /// Whether `server` accepts client sessions.
    fn serves(&self, server: usize) -> bool {
        self.replicas[server].running && (self.has_quorum() || self.ack_without_quorum)
    }

    fn is_connected(&self, client: usize, server: usize) -> bool {
        !self.unreachable.contains(&(client, server)) && self.serves(server)
    }

    /// Evaluates a write against `data` without applying it.
    fn plan(data: &BTreeMap<String, Bytes>, op: &Operation) -> std::result::Result<Vec<(String, Bytes)>, Status> {
        match op {
            Operation::Read { .. } => Ok(Vec::new()),
            Operation::Write { path, value } => {
                if data.contains_key(path) {
                    Ok(vec![(path.clone(), value.clone())])
                } else {
                    Err(Status::NoNode)
                }
            }
            Operation::CompareAndWrite {
                read_path,
                expected,
                write_path,
                value,
            } => match data.get(read_path) {
                None => Err(Status::NoNode),
                Some(current) if current != expected => Err(Status::ConditionFailed),
                Some(_) if !data.contains_key(write_path) => Err(Status::NoNode),
                Some(_) => Ok(vec![(write_path.clone(), value.clone())]),
            },
            Operation::MultiWrite { writes, create } => {
                if *create && writes.iter().any(|(path, _)| data.contains_key(path)) {
                    Err(Status::NodeExists)
                } else if !*create && writes.iter().any(|(path, _)| !data.contains_key(path)) {
                    Err(Status::NoNode)
                } else {
                    Ok(writes.clone())
                }
            }
        }
    }

    fn commit(&mut self, writes: Vec<(String, Bytes)>) {
        self.zxid += 1;
        let zxid = self.zxid;
        for replica in self.replicas.iter_mut().filter(|r| r.running) {
            for (path, value) in &writes {
                replica.data.insert(path.clone(), value.clone());
            }
            replica.zxid = zxid;
        }
    }

    /// Executes `op` on behalf of a client connected to `server`.
    fn apply(&mut self, server: usize, op: &Operation) -> Completion {
        if !self.serves(server) {
            return Completion::failed(Status::ConnectionLoss);
        }
        let quorum = self.has_quorum();

        if let Operation::Read { path } = op {
            return match self.replicas[server].data.get(path) {
                Some(value) => Completion::ok(Some(value.clone())),
                None => Completion::failed(Status::NoNode),
            };
        }

        let writes = match Self::plan(&self.replicas[server].data, op) {
            Ok(writes) => writes,
            Err(status) => return Completion::failed(status),
        };
        if quorum {
            self.commit(writes);
        } else {
            trace!(server, "acknowledging write without quorum");
            let replica = &mut self.replicas[server];
            for (path, value) in writes {
                replica.data.insert(path, value);
            }
        }
        Completion::ok(None)
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Backend whose nodes and clients share one in-memory world.
///
/// Clones share the world, so a test can keep a handle to partition pairs or
/// inspect replicas while an [`Ensemble`](crate::Ensemble) owns another.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    world: Arc<Mutex<World>>,
    latency: Duration,
}

impl MemoryBackend {
    /// Creates an empty world; nodes are added by the ensemble.
    pub fn new(seed: u64) -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                quorum: 1,
                replicas: Vec::new(),
                endpoints: HashMap::new(),
                unreachable: HashSet::new(),
                ack_without_quorum: false,
                zxid: 0,
                rng: SmallRng::seed_from_u64(seed),
            })),
            latency: DEFAULT_LATENCY,
        }
    }

    /// Sets the completion latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Enables the acknowledge-without-quorum canary.
    pub fn with_ack_without_quorum(self, enabled: bool) -> Self {
        self.world.lock().ack_without_quorum = enabled;
        self
    }

    /// Makes `server` unreachable from `client`.
    pub fn partition(&self, client: usize, server: usize) {
        self.world.lock().unreachable.insert((client, server));
    }

    /// Removes every partition.
    pub fn heal(&self) {
        self.world.lock().unreachable.clear();
    }

    /// Returns the value of `path` on replica `server`.
    pub fn replica_value(&self, server: usize, path: &str) -> Option<Bytes> {
        self.world
            .lock()
            .replicas
            .get(server)
            .and_then(|r| r.data.get(path).cloned())
    }
}

impl EnsembleBackend for MemoryBackend {
    type Node = MemoryNode;
    type Client = MemoryClient;

    fn create_node(&self, ensemble: &EnsembleConfig, node: &NodeConfig) -> Result<MemoryNode> {
        let mut world = self.world.lock();
        world.quorum = ensemble.quorum;
        let wanted = ensemble.total_servers().max(node.id + 1);
        if world.replicas.len() < wanted {
            world.replicas.resize_with(wanted, Replica::default);
        }
        world.endpoints.insert(node.endpoint(), node.id);

        Ok(MemoryNode {
            id: node.id,
            world: Arc::clone(&self.world),
        })
    }

    fn connect(&self, id: usize, endpoint: &str) -> Result<MemoryClient> {
        let server = lookup(&self.world, endpoint)?;
        Ok(MemoryClient {
            id,
            world: Arc::clone(&self.world),
            server: Mutex::new(server),
            closed: AtomicBool::new(false),
            latency: self.latency,
        })
    }
}

fn lookup(world: &Mutex<World>, endpoint: &str) -> Result<usize> {
    world
        .lock()
        .endpoints
        .get(endpoint)
        .copied()
        .ok_or_else(|| ClusterError::UnknownEndpoint(endpoint.to_string()))
}

// ============================================================================
// Nodes
// ============================================================================

/// One server slot of a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryNode {
    id: usize,
    world: Arc<Mutex<World>>,
}

impl NodeController for MemoryNode {
    fn id(&self) -> usize {
        self.id
    }

    async fn start(&mut self) -> Result<()> {
        self.world.lock().start(self.id);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.world.lock().stop(self.id);
        Ok(())
    }

    async fn is_leader(&mut self) -> bool {
        self.world.lock().leader() == Some(self.id)
    }

    fn is_running(&mut self) -> bool {
        self.world.lock().replicas[self.id].running
    }

    fn clean(&mut self) -> Result<()> {
        let mut world = self.world.lock();
        let replica = &mut world.replicas[self.id];
        replica.data.clear();
        replica.zxid = 0;
        Ok(())
    }

    fn tear_down(&mut self) -> Result<()> {
        self.clean()
    }
}

// ============================================================================
// Clients
// ============================================================================

/// One client session of a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryClient {
    id: usize,
    world: Arc<Mutex<World>>,
    server: Mutex<usize>,
    closed: AtomicBool,
    latency: Duration,
}

/// Resolves an in-flight request once its latency has elapsed.
fn deliver(
    world: &Mutex<World>,
    server: usize,
    incarnation: u64,
    op: &Operation,
) -> Option<Completion> {
    let mut world = world.lock();
    if world.replicas[server].incarnation == incarnation {
        return Some(world.apply(server, op));
    }

    // The serving node went away mid-flight: the request may still have
    // reached the leader.
    if world.rng.gen_bool(0.5) {
        if let Some(leader) = world.leader() {
            let completion = world.apply(leader, op);
            debug!(server, leader, status = ?completion.status, "in-flight request reached the leader");
        }
    }
    None
}

impl ServiceClient for MemoryClient {
    fn submit(&self, op: Operation) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        if self.closed.load(Ordering::Acquire) {
            let _ = tx.send(Completion::failed(Status::SessionExpired));
            return rx;
        }

        let server = *self.server.lock();
        let incarnation = {
            let world = self.world.lock();
            if !world.is_connected(self.id, server) {
                let _ = tx.send(Completion::failed(Status::ConnectionLoss));
                return rx;
            }
            world.replicas[server].incarnation
        };

        let world = Arc::clone(&self.world);
        let latency = self.latency;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if let Some(completion) = deliver(&world, server, incarnation, &op) {
                let _ = tx.send(completion);
            }
        });
        rx
    }

    fn connection_state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectionState::Closed;
        }
        let server = *self.server.lock();
        if self.world.lock().is_connected(self.id, server) {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        }
    }

    fn update_server_endpoint(&self, endpoint: &str) -> Result<()> {
        let server = lookup(&self.world, endpoint)?;
        *self.server.lock() = server;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortAllocator;

    fn backend_with_nodes(n: usize) -> (MemoryBackend, EnsembleConfig, Vec<MemoryNode>) {
        let backend = MemoryBackend::new(1).with_latency(Duration::ZERO);
        let config = EnsembleConfig::allocate(n, &PortAllocator::new(40000)).unwrap();
        let nodes = config
            .nodes
            .iter()
            .map(|node| backend.create_node(&config, node).unwrap())
            .collect();
        (backend, config, nodes)
    }

    async fn submit(client: &MemoryClient, op: Operation) -> Option<Completion> {
        client.submit(op).await.ok()
    }

    #[tokio::test]
    async fn test_writes_need_quorum() {
        let (backend, config, mut nodes) = backend_with_nodes(3);
        nodes[0].start().await.unwrap();
        let client = backend.connect(0, &config.nodes[0].endpoint()).unwrap();

        assert_eq!(client.connection_state(), ConnectionState::Connecting);
        let completion = submit(&client, Operation::create_keys(&["/k".to_string()])).await;
        assert_eq!(completion.unwrap().status, Status::ConnectionLoss);

        nodes[1].start().await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        let completion = submit(&client, Operation::create_keys(&["/k".to_string()])).await;
        assert_eq!(completion.unwrap().status, Status::Ok);
        assert_eq!(backend.replica_value(1, "/k"), Some(Bytes::from_static(b"0")));
        assert_eq!(backend.replica_value(2, "/k"), None);
    }

    #[tokio::test]
    async fn test_restarted_replica_resyncs() {
        let (backend, config, mut nodes) = backend_with_nodes(3);
        for node in &mut nodes[..2] {
            node.start().await.unwrap();
        }
        let client = backend.connect(0, &config.nodes[0].endpoint()).unwrap();
        submit(&client, Operation::create_keys(&["/k".to_string()])).await;

        nodes[2].start().await.unwrap();
        assert_eq!(backend.replica_value(2, "/k"), Some(Bytes::from_static(b"0")));
        assert!(nodes[0].is_leader().await);
        assert!(!nodes[2].is_leader().await);
    }

    #[tokio::test]
    async fn test_compare_and_write() {
        let (backend, config, mut nodes) = backend_with_nodes(1);
        nodes[0].start().await.unwrap();
        let client = backend.connect(0, &config.nodes[0].endpoint()).unwrap();
        submit(&client, Operation::create_keys(&["/a".to_string(), "/b".to_string()])).await;

        let cas = |expected: i64| Operation::CompareAndWrite {
            read_path: "/a".to_string(),
            expected: Operation::encode(expected),
            write_path: "/b".to_string(),
            value: Operation::encode(7),
        };
        assert_eq!(submit(&client, cas(1)).await.unwrap().status, Status::ConditionFailed);
        assert_eq!(backend.replica_value(0, "/b"), Some(Operation::encode(0)));

        assert_eq!(submit(&client, cas(0)).await.unwrap().status, Status::Ok);
        assert_eq!(backend.replica_value(0, "/b"), Some(Operation::encode(7)));
    }

    #[tokio::test]
    async fn test_partition_and_endpoint_update() {
        let (backend, config, mut nodes) = backend_with_nodes(3);
        for node in &mut nodes {
            node.start().await.unwrap();
        }
        let client = backend.connect(0, &config.nodes[0].endpoint()).unwrap();
        backend.partition(0, 0);
        assert_eq!(client.connection_state(), ConnectionState::Connecting);

        client.update_server_endpoint(&config.nodes[1].endpoint()).unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert!(client.update_server_endpoint("10.0.0.1:1").is_err());

        client.close();
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_in_flight_drops_completion() {
        let backend = MemoryBackend::new(3).with_latency(Duration::from_millis(50));
        let config = EnsembleConfig::allocate(3, &PortAllocator::new(41000)).unwrap();
        let mut nodes: Vec<MemoryNode> = config
            .nodes
            .iter()
            .map(|node| backend.create_node(&config, node).unwrap())
            .collect();
        for node in &mut nodes {
            node.start().await.unwrap();
        }
        let client = backend.connect(2, &config.nodes[2].endpoint()).unwrap();

        let pending = client.submit(Operation::create_keys(&["/k".to_string()]));
        nodes[2].shutdown().await.unwrap();
        assert!(pending.await.is_err());
    }
}
