//! Batch runner: every harness of a scenario, on parallel workers.
//!
//! Each worker owns one ensemble and executes `executions` runs against it.
//! Workers of the same harness share one port allocator, which is reset
//! before the next harness so port numbers are reused across harnesses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};
use zoocheck_cluster::{
    DEFAULT_BASE_PORT, Ensemble, EnsembleBackend, EnsembleConfig, EnsembleTiming, PortAllocator,
};
use zoocheck_oracle::{Harness, HarnessDef};

use crate::engine::{EngineConfig, RunOutcome, RunRecord, ScenarioEngine};
use crate::error::{Result, SimError};
use crate::rng::SimRng;
use crate::scenarios::{HarnessShape, ScenarioType};

// ============================================================================
// Batch Configuration
// ============================================================================

/// Configuration of a batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub scenario: ScenarioType,
    pub servers: usize,
    /// Defaults to a majority of `servers`.
    pub quorum: Option<usize>,
    /// Parallel workers per harness.
    pub threads: usize,
    /// Runs per worker.
    pub executions: usize,
    /// Reused for every run when set. Otherwise each run gets a fresh seed.
    pub seed: Option<u64>,
    pub base_port: u16,
    pub timing: EnsembleTiming,
    /// The driver is taken from the scenario.
    pub engine: EngineConfig,
    pub shape: HarnessShape,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioType::Baseline,
            servers: 3,
            quorum: None,
            threads: 1,
            executions: 1,
            seed: None,
            base_port: DEFAULT_BASE_PORT,
            timing: EnsembleTiming::default(),
            engine: EngineConfig::default(),
            shape: HarnessShape::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.servers == 0 {
            return Err(SimError::Config("servers must be positive".to_string()));
        }
        if let Some(quorum) = self.quorum {
            if quorum == 0 || quorum > self.servers {
                return Err(SimError::Config(format!(
                    "quorum {quorum} is not within 1..={}",
                    self.servers
                )));
            }
        }
        if self.threads == 0 {
            return Err(SimError::Config("threads must be positive".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Batch Results
// ============================================================================

/// One run of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    /// Index into [`BatchResults::harnesses`].
    pub harness: usize,
    pub worker: usize,
    #[serde(flatten)]
    pub run: RunRecord,
}

/// Results of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResults {
    pub scenario: ScenarioType,
    /// Seed of the batch generator; `None` when a fixed run seed was given.
    pub batch_seed: Option<u64>,
    pub harnesses: Vec<HarnessDef>,
    pub records: Vec<BatchRecord>,
    pub passed: u64,
    pub assertion_failures: u64,
    /// Includes matching failures.
    pub infrastructure_failures: u64,
    pub matching_failures: u64,
    /// Seeds of the runs that did not pass.
    pub failed_seeds: Vec<u64>,
    pub elapsed_secs: f64,
}

impl BatchResults {
    fn new(scenario: ScenarioType, batch_seed: Option<u64>, harnesses: &[Arc<Harness>]) -> Self {
        Self {
            scenario,
            batch_seed,
            harnesses: harnesses.iter().map(|h| h.to_def()).collect(),
            records: Vec::new(),
            passed: 0,
            assertion_failures: 0,
            infrastructure_failures: 0,
            matching_failures: 0,
            failed_seeds: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    fn record(&mut self, record: BatchRecord) {
        match record.run.outcome {
            RunOutcome::Passed => self.passed += 1,
            RunOutcome::AssertionFailed => self.assertion_failures += 1,
            RunOutcome::InfrastructureFailed => self.infrastructure_failures += 1,
            RunOutcome::MatchingFailed => {
                self.infrastructure_failures += 1;
                self.matching_failures += 1;
            }
        }
        if !record.run.passed() {
            self.failed_seeds.push(record.run.seed);
        }
        self.records.push(record);
    }

    pub fn total(&self) -> u64 {
        self.records.len() as u64
    }

    /// Returns true if every run passed.
    pub fn all_passed(&self) -> bool {
        self.passed == self.total()
    }

    /// Returns the success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.passed as f64 / self.records.len() as f64
        }
    }
}

// ============================================================================
// Batch Runner
// ============================================================================

/// Runs a scenario's harnesses on parallel workers.
///
/// `make_backend` builds the backend of one worker from the worker index.
pub struct BatchRunner<B, F> {
    config: BatchConfig,
    make_backend: F,
    _backend: std::marker::PhantomData<fn() -> B>,
}

impl<B, F> BatchRunner<B, F>
where
    B: EnsembleBackend + 'static,
    F: Fn(usize) -> B + Send + Sync + 'static,
{
    pub fn new(config: BatchConfig, make_backend: F) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            make_backend,
            _backend: std::marker::PhantomData,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs the whole batch. Failures of single runs are recorded, never
    /// returned; only an unusable scenario fails the batch.
    pub async fn run(&self) -> Result<BatchResults> {
        let started = Instant::now();
        let mut batch_rng = match self.config.seed {
            Some(seed) => SimRng::new(seed),
            None => SimRng::from_entropy(),
        };
        let batch_seed = self.config.seed.is_none().then(|| batch_rng.seed());
        if let Some(seed) = batch_seed {
            info!(batch_seed = seed, "initialized batch random number generator");
        }

        let harnesses = self
            .config
            .scenario
            .harnesses(&self.config.shape, &mut batch_rng)?;
        let ports = Arc::new(PortAllocator::new(self.config.base_port));
        let mut results = BatchResults::new(self.config.scenario, batch_seed, &harnesses);

        for (index, harness) in harnesses.iter().enumerate() {
            info!(harness = index, %harness, "starting executions");
            ports.reset();

            let mut workers = JoinSet::new();
            let mut assigned = HashMap::new();
            for worker in 0..self.config.threads {
                let seeds: Vec<u64> = (0..self.config.executions)
                    .map(|_| self.config.seed.unwrap_or_else(|| batch_rng.next_u64()))
                    .collect();
                let job = Worker {
                    index: worker,
                    backend: (self.make_backend)(worker),
                    harness: Arc::clone(harness),
                    ports: Arc::clone(&ports),
                    config: self.config.clone(),
                };
                let task = workers.spawn({
                    let seeds = seeds.clone();
                    async move { (worker, job.run(seeds).await) }
                });
                assigned.insert(task.id(), (worker, seeds));
            }

            let mut finished = Vec::new();
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(done) => finished.push(done),
                    Err(e) => {
                        error!(harness = index, error = %e, "worker task failed");
                        // The worker's runs never reported; count each as failed.
                        if let Some((worker, seeds)) = assigned.remove(&e.id()) {
                            finished.push((worker, failed_runs(seeds, &e.to_string())));
                        }
                    }
                }
            }
            finished.sort_by_key(|(worker, _)| *worker);
            for (worker, records) in finished {
                for run in records {
                    results.record(BatchRecord {
                        harness: index,
                        worker,
                        run,
                    });
                }
            }
        }

        results.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            failed_assertions = results.assertion_failures,
            failed_otherwise = results.infrastructure_failures,
            total = results.total(),
            "finished executions"
        );
        Ok(results)
    }
}

/// One worker: an ensemble and the seeds it runs.
struct Worker<B> {
    index: usize,
    backend: B,
    harness: Arc<Harness>,
    ports: Arc<PortAllocator>,
    config: BatchConfig,
}

impl<B: EnsembleBackend> Worker<B> {
    async fn run(self, seeds: Vec<u64>) -> Vec<RunRecord> {
        let Worker {
            index,
            backend,
            harness,
            ports,
            config,
        } = self;

        let mut engine = match build_engine(backend, harness, &ports, &config) {
            Ok(engine) => engine,
            Err(e) => {
                error!(worker = index, error = %e, "failed to set up worker");
                return failed_runs(seeds, &e.to_string());
            }
        };

        let total = seeds.len();
        let mut records = Vec::with_capacity(total);
        for (i, seed) in seeds.into_iter().enumerate() {
            info!(worker = index, execution = i + 1, total, seed, "starting execution");
            records.push(engine.run(seed).await);
        }
        if let Err(e) = engine.tear_down() {
            error!(worker = index, error = %e, "teardown failed");
        }
        records
    }
}

/// Records for runs that never got to execute.
fn failed_runs(seeds: Vec<u64>, message: &str) -> Vec<RunRecord> {
    seeds
        .into_iter()
        .map(|seed| RunRecord {
            seed,
            outcome: RunOutcome::InfrastructureFailed,
            executed: Vec::new(),
            maybe: Vec::new(),
            error: Some(message.to_string()),
        })
        .collect()
}

fn build_engine<B: EnsembleBackend>(
    backend: B,
    harness: Arc<Harness>,
    ports: &PortAllocator,
    config: &BatchConfig,
) -> Result<ScenarioEngine<B>> {
    let mut ensemble_config =
        EnsembleConfig::allocate(config.servers, ports)?.with_timing(config.timing);
    if let Some(quorum) = config.quorum {
        ensemble_config = ensemble_config.with_quorum(quorum)?;
    }
    let engine_config = EngineConfig {
        driver: config.scenario.driver(),
        ..config.engine.clone()
    };
    ScenarioEngine::new(Ensemble::new(backend, ensemble_config), harness, engine_config)
}
