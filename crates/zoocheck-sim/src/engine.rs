//! Scenario engine: drives one harness through an ensemble while injecting
//! faults, then checks the final state against the oracle.
//!
//! A run moves through [`EngineState::Init`] (start the ensemble, create the
//! keys), [`EngineState::Running`] (the driver issues the harness requests
//! and starts, stops and crashes servers), [`EngineState::Verifying`] (start
//! every server, compute the legal states, compare every replica) and
//! [`EngineState::Done`]. The ensemble is stopped on every exit path.
//!
//! Three drivers decide when servers go down:
//!
//! - [`Driver::Baseline`]: event driven. Phases fire at a fixed interval
//!   while start/stop events arrive with exponential inter-arrival times.
//! - [`Driver::Paper`]: every phase runs against the servers the fault
//!   budget leaves up, with some of them crashed while the request is in
//!   flight.
//! - [`Driver::Quorum`]: every phase starts a minimal quorum and crashes up
//!   to `quorum - 1` of its members.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, oneshot};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, error, info, warn};
use zoocheck_cluster::{
    Completion, Ensemble, EnsembleBackend, Operation, RequestOutcome, Status,
};
use zoocheck_oracle::{ConsistencyProperty, Harness, Phase, key_path};

use crate::error::{Result, SimError};
use crate::event::{EventKind, EventQueue, duration_ns};
use crate::fault::{FaultPolicy, FaultScheduler};
use crate::rng::SimRng;
use crate::subset::SubsetSampler;

// ============================================================================
// Configuration
// ============================================================================

/// How faults are injected while the harness runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Driver {
    /// Timed phases interleaved with random start/stop events.
    #[default]
    Baseline,

    /// Per-phase fault budget over all servers, with crashes mid-request.
    Paper,

    /// Per-phase minimal quorum with a fault budget below the quorum.
    Quorum,
}

/// Engine parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub driver: Driver,

    /// Delay between consecutive phases of the event-driven driver.
    pub phase_interval: Duration,

    /// Mean delay between start/stop events of the event-driven driver.
    pub mean_start_stop: Duration,

    /// How long to wait for outstanding completions before verifying.
    pub completion_timeout: Duration,

    /// Pause after issuing a request before the driver moves on.
    pub request_settle: Duration,

    /// Total faults of a run for the fault-budget drivers.
    pub faults: usize,

    pub fault_policy: FaultPolicy,

    /// Per-phase fault cap. Defaults to every server for
    /// [`Driver::Paper`] and `quorum - 1` for [`Driver::Quorum`].
    pub max_faults_per_round: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Baseline,
            phase_interval: Duration::from_secs(5),
            mean_start_stop: Duration::from_secs(2),
            completion_timeout: Duration::from_secs(5),
            request_settle: Duration::from_millis(100),
            faults: 0,
            fault_policy: FaultPolicy::Exact,
            max_faults_per_round: None,
        }
    }
}

// ============================================================================
// Run Results
// ============================================================================

/// Lifecycle of the engine within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Running,
    Verifying,
    Done,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every replica agreed on a legal state.
    Passed,
    /// Replicas disagreed or agreed on an illegal state.
    AssertionFailed,
    /// The harness itself failed: I/O, timeouts, configuration, oracle limits.
    InfrastructureFailed,
    /// No client/server assignment could reach the servers.
    MatchingFailed,
}

impl RunOutcome {
    fn classify(result: &Result<()>) -> Self {
        match result {
            Ok(()) => RunOutcome::Passed,
            Err(e) if e.is_assertion() => RunOutcome::AssertionFailed,
            Err(e) if e.is_fatal_matching() => RunOutcome::MatchingFailed,
            Err(_) => RunOutcome::InfrastructureFailed,
        }
    }
}

/// Record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub seed: u64,
    pub outcome: RunOutcome,
    /// Phases whose request definitely took effect.
    pub executed: Vec<usize>,
    /// Phases whose request may have taken effect.
    pub maybe: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }
}

// ============================================================================
// Completion Tracking
// ============================================================================

#[derive(Debug, Default)]
struct Outcomes {
    executed: BTreeSet<usize>,
    maybe: BTreeSet<usize>,
    pending: BTreeSet<usize>,
    /// Set once the run has settled; later completions are ignored.
    closed: bool,
}

impl Outcomes {
    /// Stops accepting completions. Requests still unresolved may have
    /// executed.
    fn close(&mut self) {
        self.closed = true;
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            warn!(phases = ?pending, "unresolved requests treated as maybe executed");
        }
        self.maybe.extend(pending);
    }
}

/// Releases one permit when the completion task ends, however it ends.
struct CompletionGuard(Arc<Semaphore>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.add_permits(1);
    }
}

/// Classifies the completions of the requests issued during a run.
struct CompletionTracker {
    outcomes: Arc<Mutex<Outcomes>>,
    done: Arc<Semaphore>,
    issued: u32,
}

impl CompletionTracker {
    fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Outcomes::default())),
            done: Arc::new(Semaphore::new(0)),
            issued: 0,
        }
    }

    fn track(&mut self, phase: usize, completion: oneshot::Receiver<Completion>) {
        self.outcomes.lock().pending.insert(phase);
        self.issued += 1;

        let outcomes = Arc::clone(&self.outcomes);
        let guard = CompletionGuard(Arc::clone(&self.done));
        tokio::spawn(async move {
            let _guard = guard;
            let (outcome, status) = match completion.await {
                Ok(completion) => (completion.outcome(), Some(completion.status)),
                Err(_) => (RequestOutcome::Ambiguous, None),
            };

            let mut outcomes = outcomes.lock();
            if outcomes.closed {
                debug!(phase, ?status, "completion arrived after the run settled, ignored");
                return;
            }
            outcomes.pending.remove(&phase);
            match outcome {
                RequestOutcome::Executed => {
                    info!(phase, ?status, "request completed");
                    outcomes.executed.insert(phase);
                }
                RequestOutcome::Ambiguous => {
                    warn!(phase, ?status, "request undetermined");
                    outcomes.maybe.insert(phase);
                }
                RequestOutcome::NotExecuted => {
                    warn!(phase, ?status, "request rejected");
                }
            }
        });
    }

    /// Waits up to `limit` for every completion, then closes the tracker.
    async fn settle(&self, limit: Duration) -> (BTreeSet<usize>, BTreeSet<usize>) {
        if self.issued > 0 {
            match timeout(limit, self.done.acquire_many(self.issued)).await {
                Ok(Ok(permits)) => permits.forget(),
                Ok(Err(_)) => {}
                Err(_) => warn!(
                    issued = self.issued,
                    timeout_ms = limit.as_millis(),
                    "not all requests are done, proceeding anyway"
                ),
            }
        }

        let mut outcomes = self.outcomes.lock();
        outcomes.close();
        (outcomes.executed.clone(), outcomes.maybe.clone())
    }

    /// Closes the tracker and returns the executed and maybe-executed phases.
    /// The two lists never share a phase.
    fn finish(&self) -> (Vec<usize>, Vec<usize>) {
        let mut outcomes = self.outcomes.lock();
        outcomes.close();
        (
            outcomes.executed.iter().copied().collect(),
            outcomes.maybe.iter().copied().collect(),
        )
    }
}

/// The request a phase sends, with the node that sends it.
fn phase_request(phase: &Phase) -> Option<(usize, Operation)> {
    match *phase {
        Phase::Empty => None,
        Phase::UnconditionalWrite { node, key, value } => Some((
            node,
            Operation::Write {
                path: key_path(key),
                value: Operation::encode(value),
            },
        )),
        Phase::ConditionalWrite {
            node,
            read_key,
            expected,
            write_key,
            value,
        } => Some((
            node,
            Operation::CompareAndWrite {
                read_path: key_path(read_key),
                expected: Operation::encode(expected),
                write_path: key_path(write_key),
                value: Operation::encode(value),
            },
        )),
    }
}

// ============================================================================
// Scenario Engine
// ============================================================================

/// Runs a harness against an ensemble, one seed at a time.
pub struct ScenarioEngine<B: EnsembleBackend> {
    ensemble: Ensemble<B>,
    harness: Arc<Harness>,
    config: EngineConfig,
    state: EngineState,
}

impl<B: EnsembleBackend> ScenarioEngine<B> {
    /// Creates an engine. Fails if the harness issues requests from a node
    /// the ensemble does not have.
    pub fn new(ensemble: Ensemble<B>, harness: Arc<Harness>, config: EngineConfig) -> Result<Self> {
        let servers = ensemble.total_servers();
        if let Some(max_node) = harness.max_node() {
            if max_node >= servers {
                return Err(SimError::HarnessTooWide { max_node, servers });
            }
        }
        if config.driver == Driver::Baseline && config.phase_interval.is_zero() {
            return Err(SimError::Config("phase interval must be positive".to_string()));
        }

        Ok(Self {
            ensemble,
            harness,
            config,
            state: EngineState::Init,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn harness(&self) -> &Arc<Harness> {
        &self.harness
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ensemble(&self) -> &Ensemble<B> {
        &self.ensemble
    }

    /// Per-phase fault cap of the fault-budget drivers.
    pub fn fault_cap(&self) -> usize {
        self.config
            .max_faults_per_round
            .unwrap_or(match self.config.driver {
                Driver::Baseline => 0,
                Driver::Paper => self.ensemble.total_servers(),
                Driver::Quorum => self.ensemble.quorum().saturating_sub(1),
            })
    }

    /// Executes one run. Every random choice derives from `seed`.
    pub async fn run(&mut self, seed: u64) -> RunRecord {
        info!(seed, driver = ?self.config.driver, phases = self.harness.len(), "starting execution");
        let mut rng = SimRng::new(seed);
        let mut tracker = CompletionTracker::new();

        let mut result = self.execute(&mut rng, &mut tracker).await;
        if let Err(e) = self.ensemble.stop_ensemble().await {
            error!(seed, error = %e, "failed to stop ensemble");
            if result.is_ok() {
                result = Err(e.into());
            }
        }
        self.state = EngineState::Done;

        let outcome = RunOutcome::classify(&result);
        match &result {
            Ok(()) => info!(seed, "execution passed"),
            Err(e) if outcome == RunOutcome::AssertionFailed => {
                error!(seed, error = %e, "assertion failed");
            }
            Err(e) => error!(seed, error = %e, "execution failed"),
        }

        let (executed, maybe) = tracker.finish();
        RunRecord {
            seed,
            outcome,
            executed,
            maybe,
            error: result.err().map(|e| e.to_string()),
        }
    }

    /// Releases the ensemble's per-node state after the last run.
    pub fn tear_down(&mut self) -> Result<()> {
        self.ensemble.tear_down()?;
        Ok(())
    }

    async fn execute(&mut self, rng: &mut SimRng, tracker: &mut CompletionTracker) -> Result<()> {
        self.state = EngineState::Init;
        self.ensemble.start_ensemble().await?;
        self.send_init_request().await?;

        self.state = EngineState::Running;
        match self.config.driver {
            Driver::Baseline => self.drive_events(rng, tracker).await?,
            Driver::Paper => self.drive_paper(rng, tracker).await?,
            Driver::Quorum => self.drive_quorum(rng, tracker).await?,
        }
        let (executed, maybe) = tracker.settle(self.config.completion_timeout).await;

        self.state = EngineState::Verifying;
        self.ensemble.start_all_servers().await?;
        info!(?executed, ?maybe, "checking consistency");
        let legal = self.harness.possible_states(&executed, &maybe)?;
        debug!(legal = legal.len(), "legal states computed");
        self.ensemble
            .check_property(&ConsistencyProperty::new(legal), self.harness.num_keys())
            .await?;
        Ok(())
    }

    /// Creates every key through the leader.
    async fn send_init_request(&mut self) -> Result<()> {
        let leader = self.ensemble.leader().await?;
        let completion = self
            .ensemble
            .handle_request(leader, Operation::create_keys(&self.harness.keys()))?;

        match timeout(self.config.completion_timeout, completion).await {
            Ok(Ok(completion)) if completion.status == Status::Ok => {
                debug!(leader, "keys created");
                Ok(())
            }
            Ok(Ok(completion)) => Err(SimError::InitRequestFailed(completion.status)),
            Ok(Err(_)) => Err(SimError::InitRequestFailed(Status::ConnectionLoss)),
            Err(_) => Err(SimError::InitRequestTimedOut),
        }
    }

    /// Sends the request of phase `index`, if it has one.
    fn issue(&self, index: usize, tracker: &mut CompletionTracker) -> Result<()> {
        let phase = &self.harness.phases()[index];
        let Some((node, op)) = phase_request(phase) else {
            return Ok(());
        };
        info!(index, %phase, "initiating request");
        let completion = self.ensemble.handle_request(node, op)?;
        tracker.track(index, completion);
        Ok(())
    }

    // ========================================================================
    // Event-driven driver
    // ========================================================================

    async fn drive_events(&mut self, rng: &mut SimRng, tracker: &mut CompletionTracker) -> Result<()> {
        let phases = self.harness.len();
        if phases == 0 {
            return Ok(());
        }
        let servers = self.ensemble.total_servers();
        let interval = duration_ns(self.config.phase_interval);

        let origin = Instant::now();
        let mut queue = EventQueue::new();
        queue.schedule(interval, EventKind::ExecutePhase { index: 0 });
        queue.schedule(
            duration_ns(rng.exponential(self.config.mean_start_stop)),
            EventKind::StartOrStop {
                server: rng.next_usize(servers),
            },
        );

        // Starting a lone server below quorum leaves its client unable to
        // connect, so starts are batched until they form a quorum.
        let mut start_batch = BTreeSet::new();

        while let Some(event) = queue.pop() {
            sleep_until(origin + Duration::from_nanos(event.time_ns)).await;
            let now = duration_ns(origin.elapsed());

            match event.kind {
                EventKind::ExecutePhase { index } => {
                    let last = index + 1 == phases;
                    if !last {
                        queue.schedule(
                            now.saturating_add(interval),
                            EventKind::ExecutePhase { index: index + 1 },
                        );
                    }
                    self.execute_phase(index, tracker).await?;
                    if last {
                        break;
                    }
                }
                EventKind::StartOrStop { server } => {
                    let delay = rng.exponential(self.config.mean_start_stop);
                    queue.schedule(
                        now.saturating_add(duration_ns(delay)),
                        EventKind::StartOrStop {
                            server: rng.next_usize(servers),
                        },
                    );
                    self.start_or_stop(server, &mut start_batch).await?;
                }
            }
        }
        Ok(())
    }

    async fn execute_phase(&mut self, index: usize, tracker: &mut CompletionTracker) -> Result<()> {
        let phase = self.harness.phases()[index];
        debug!(index, %phase, "executing phase");
        let Some(node) = phase.node() else {
            return Ok(());
        };
        if !self.ensemble.is_running(node) {
            info!(index, node, "node is down, request not issued");
            return Ok(());
        }
        self.issue(index, tracker)?;
        sleep(self.config.request_settle).await;
        Ok(())
    }

    async fn start_or_stop(&mut self, server: usize, start_batch: &mut BTreeSet<usize>) -> Result<()> {
        let quorum = self.ensemble.quorum();
        if self.ensemble.is_running(server) {
            // Crash without waiting for the clients to notice.
            self.ensemble.crash_servers(&[server]).await?;
            return Ok(());
        }

        if self.ensemble.total_running_servers() + 1 < quorum {
            start_batch.insert(server);
            info!(server, batch = ?start_batch, "too few servers running, batching start");
            if start_batch.len() >= quorum {
                let batch: Vec<usize> = std::mem::take(start_batch).into_iter().collect();
                self.ensemble.start_servers(&batch).await?;
            }
            return Ok(());
        }
        self.ensemble.start_servers(&[server]).await?;
        Ok(())
    }

    // ========================================================================
    // Fault-budget drivers
    // ========================================================================

    fn fault_scheduler(&self, rng: &mut SimRng) -> FaultScheduler {
        FaultScheduler::new(
            self.config.fault_policy,
            self.harness.len(),
            self.fault_cap(),
            self.config.faults,
            rng.fork(),
        )
    }

    async fn drive_paper(&mut self, rng: &mut SimRng, tracker: &mut CompletionTracker) -> Result<()> {
        let servers = self.ensemble.total_servers();
        let quorum = self.ensemble.quorum();
        let mut faults = self.fault_scheduler(rng);
        let mut subsets = SubsetSampler::new(rng.fork());

        self.ensemble.stop_all_servers().await?;

        for index in 0..self.harness.len() {
            let phase = self.harness.phases()[index];
            let f = faults.generate();
            let down = subsets.sample(servers, f);

            let crash_later: Vec<usize> = if phase.is_request() {
                subsets.sample_any(down.len()).into_iter().map(|i| down[i]).collect()
            } else {
                Vec::new()
            };
            let to_start: Vec<usize> = (0..servers)
                .filter(|id| !down.contains(id) || crash_later.contains(id))
                .collect();
            if to_start.len() < quorum {
                // The started servers could not elect a leader.
                info!(index, faults = f, ?down, "phase skipped, no quorum");
                continue;
            }
            debug!(index, faults = f, ?down, ?crash_later, "running phase");

            self.ensemble.start_servers(&to_start).await?;
            self.ensemble.crash_servers(&crash_later).await?;

            let issuer = phase.node().filter(|node| !down.contains(node));
            if issuer.is_some() {
                self.issue(index, tracker)?;
                sleep(self.config.request_settle).await;
            }
            self.ensemble.stop_servers(&to_start).await?;
        }
        Ok(())
    }

    async fn drive_quorum(&mut self, rng: &mut SimRng, tracker: &mut CompletionTracker) -> Result<()> {
        let servers = self.ensemble.total_servers();
        let quorum = self.ensemble.quorum();
        let mut faults = self.fault_scheduler(rng);
        let mut subsets = SubsetSampler::new(rng.fork());

        self.ensemble.stop_all_servers().await?;

        for index in 0..self.harness.len() {
            let phase = self.harness.phases()[index];
            let started = if quorum == servers / 2 + 1 {
                subsets.minimal_quorum(servers)
            } else {
                subsets.sample(servers, quorum)
            };
            self.ensemble.start_servers(&started).await?;

            let f = faults.generate();
            let crashed: Vec<usize> = subsets
                .sample(started.len(), f)
                .into_iter()
                .map(|i| started[i])
                .collect();
            self.ensemble.crash_servers(&crashed).await?;
            debug!(index, ?started, ?crashed, "running phase");

            let issuer = phase.node().filter(|node| started.contains(node) && !crashed.contains(node));
            if issuer.is_some() {
                self.issue(index, tracker)?;
                sleep(self.config.request_settle).await;
            }
            self.ensemble.stop_servers(&started).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoocheck_cluster::{EnsembleConfig, EnsembleTiming, MemoryBackend, PortAllocator};

    fn engine(harness: Vec<Phase>, config: EngineConfig) -> Result<ScenarioEngine<MemoryBackend>> {
        let ports = PortAllocator::new(20_000);
        let ensemble_config = EnsembleConfig::allocate(3, &ports)?.with_timing(EnsembleTiming {
            poll_attempts: 10,
            poll_interval: Duration::from_millis(10),
            join_timeout: Duration::from_millis(10),
        });
        let ensemble = Ensemble::new(MemoryBackend::new(1), ensemble_config);
        ScenarioEngine::new(ensemble, Arc::new(Harness::new(harness, 2)?), config)
    }

    #[test]
    fn test_phase_requests() {
        assert!(phase_request(&Phase::Empty).is_none());

        let (node, op) = phase_request(&Phase::ConditionalWrite {
            node: 1,
            read_key: 0,
            expected: 0,
            write_key: 1,
            value: 7,
        })
        .unwrap();
        assert_eq!(node, 1);
        assert_eq!(
            op,
            Operation::CompareAndWrite {
                read_path: "/key0".to_string(),
                expected: Operation::encode(0),
                write_path: "/key1".to_string(),
                value: Operation::encode(7),
            }
        );
    }

    #[test]
    fn test_rejects_harness_wider_than_ensemble() {
        let result = engine(
            vec![Phase::UnconditionalWrite { node: 3, key: 0, value: 1 }],
            EngineConfig::default(),
        );
        assert!(matches!(
            result,
            Err(SimError::HarnessTooWide { max_node: 3, servers: 3 })
        ));
    }

    #[test]
    fn test_fault_cap_defaults() {
        let phases = vec![Phase::Empty];
        let paper = engine(phases.clone(), EngineConfig { driver: Driver::Paper, ..EngineConfig::default() }).unwrap();
        assert_eq!(paper.fault_cap(), 3);

        let quorum = engine(phases.clone(), EngineConfig { driver: Driver::Quorum, ..EngineConfig::default() }).unwrap();
        assert_eq!(quorum.fault_cap(), 1);

        let capped = engine(
            phases,
            EngineConfig {
                driver: Driver::Paper,
                max_faults_per_round: Some(2),
                ..EngineConfig::default()
            },
        )
        .unwrap();
        assert_eq!(capped.fault_cap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_classifies_completions() {
        let mut tracker = CompletionTracker::new();

        let (ok_tx, ok_rx) = oneshot::channel();
        let (lost_tx, lost_rx) = oneshot::channel();
        let (dropped_tx, dropped_rx) = oneshot::channel::<Completion>();
        let (rejected_tx, rejected_rx) = oneshot::channel();
        let (_silent_tx, silent_rx) = oneshot::channel::<Completion>();

        tracker.track(0, ok_rx);
        tracker.track(1, lost_rx);
        tracker.track(2, dropped_rx);
        tracker.track(3, rejected_rx);
        tracker.track(4, silent_rx);

        ok_tx.send(Completion::ok(None)).unwrap();
        lost_tx.send(Completion::failed(Status::ConnectionLoss)).unwrap();
        drop(dropped_tx);
        rejected_tx.send(Completion::failed(Status::NoNode)).unwrap();

        let (executed, maybe) = tracker.settle(Duration::from_secs(1)).await;
        assert_eq!(executed, BTreeSet::from([0]));
        assert_eq!(maybe, BTreeSet::from([1, 2, 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_is_ignored_after_settle() {
        let mut tracker = CompletionTracker::new();
        let (late_tx, late_rx) = oneshot::channel();
        tracker.track(0, late_rx);

        let (executed, maybe) = tracker.settle(Duration::from_millis(100)).await;
        assert!(executed.is_empty());
        assert_eq!(maybe, BTreeSet::from([0]));

        late_tx.send(Completion::ok(None)).unwrap();
        sleep(Duration::from_millis(10)).await;

        let (executed, maybe) = tracker.finish();
        assert!(executed.is_empty());
        assert_eq!(maybe, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_without_settle_moves_pending_to_maybe() {
        let mut tracker = CompletionTracker::new();
        let (done_tx, done_rx) = oneshot::channel();
        let (_pending_tx, pending_rx) = oneshot::channel::<Completion>();
        tracker.track(0, done_rx);
        tracker.track(2, pending_rx);

        done_tx.send(Completion::ok(None)).unwrap();
        sleep(Duration::from_millis(10)).await;

        let (executed, maybe) = tracker.finish();
        assert_eq!(executed, vec![0]);
        assert_eq!(maybe, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_done_after_run() {
        let mut engine = engine(
            vec![Phase::UnconditionalWrite { node: 0, key: 0, value: 5 }],
            EngineConfig {
                phase_interval: Duration::from_millis(500),
                ..EngineConfig::default()
            },
        )
        .unwrap();
        assert_eq!(engine.state(), EngineState::Init);

        let record = engine.run(3).await;
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(record.seed, 3);
        assert!(record.executed.len() + record.maybe.len() <= 1);
    }
}
