//! Configuration management for zoocheck
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence)
//! 2. Environment variables (ZKC_* prefix, `__` between section and key)
//! 3. zoocheck.local.toml (gitignored, local overrides)
//! 4. zoocheck.toml (git-tracked, project config)
//! 5. ~/.config/zoocheck/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use zoocheck_cluster::{DEFAULT_BASE_PORT, EnsembleTiming};
use zoocheck_sim::{BatchConfig, EngineConfig, FaultPolicy, HarnessShape, ScenarioType};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE, Paths};

/// Ports every server slot takes from the allocator.
const PORTS_PER_SERVER: u32 = 3;

/// Main zoocheck configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoocheckConfig {
    pub run: RunConfig,
    pub ensemble: EnsembleSection,
    pub timing: TimingConfig,
    pub oracle: OracleConfig,
    pub backend: BackendConfig,
}

/// What a batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub scenario: ScenarioType,
    /// Parallel workers per harness.
    pub threads: usize,
    /// Runs per worker.
    pub executions: usize,
    /// Harnesses drawn by the random-harness scenario.
    pub harnesses: usize,
    pub phases: usize,
    pub requests: usize,
    /// Fault budget of one run.
    pub faults: usize,
    pub fault_policy: FaultPolicy,
    pub max_faults_per_round: Option<usize>,
    /// Fixed seed for every run; fresh seeds when unset.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioType::Baseline,
            threads: 1,
            executions: 1,
            harnesses: 1,
            phases: 3,
            requests: 2,
            faults: 0,
            fault_policy: FaultPolicy::Exact,
            max_faults_per_round: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSection {
    pub servers: usize,
    /// Majority of `servers` when unset.
    pub quorum: Option<usize>,
    pub base_port: u16,
}

impl Default for EnsembleSection {
    fn default() -> Self {
        Self {
            servers: 3,
            quorum: None,
            base_port: DEFAULT_BASE_PORT,
        }
    }
}

/// Delays and timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub phase_interval_ms: u64,
    pub mean_start_stop_ms: u64,
    pub completion_timeout_ms: u64,
    pub request_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let ensemble = EnsembleTiming::default();
        let engine = EngineConfig::default();
        Self {
            poll_attempts: ensemble.poll_attempts,
            poll_interval_ms: millis(ensemble.poll_interval),
            join_timeout_ms: millis(ensemble.join_timeout),
            phase_interval_ms: millis(engine.phase_interval),
            mean_start_stop_ms: millis(engine.mean_start_stop),
            completion_timeout_ms: millis(engine.completion_timeout),
            request_settle_ms: millis(engine.request_settle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Maybe-executed phases the oracle accepts before giving up.
    pub max_ambiguous_phases: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_ambiguous_phases: HarnessShape::default().max_ambiguous_phases,
        }
    }
}

/// In-memory ensemble settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub latency_ms: u64,
    /// Acknowledge writes without a quorum. Only useful to check that
    /// scenarios catch a broken service.
    pub ack_without_quorum: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            latency_ms: 1,
            ack_without_quorum: false,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ZoocheckConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parses a single TOML file, with defaults for everything it omits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// A tiny configuration for smoke runs: short delays, few executions.
    pub fn quick() -> Self {
        Self {
            timing: TimingConfig {
                poll_attempts: 20,
                poll_interval_ms: 5,
                join_timeout_ms: 5,
                phase_interval_ms: 20,
                mean_start_stop_ms: 10,
                completion_timeout_ms: 200,
                request_settle_ms: 5,
            },
            ..Self::default()
        }
    }

    /// Checks the values no batch could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ensemble = &self.ensemble;
        if ensemble.servers == 0 {
            return Err(ConfigError::ValidationError(
                "ensemble.servers must be positive".to_string(),
            ));
        }
        if let Some(quorum) = ensemble.quorum {
            if quorum == 0 || quorum > ensemble.servers {
                return Err(ConfigError::ValidationError(format!(
                    "ensemble.quorum {quorum} is not within 1..={}",
                    ensemble.servers
                )));
            }
        }
        if self.run.threads == 0 {
            return Err(ConfigError::ValidationError(
                "run.threads must be positive".to_string(),
            ));
        }
        if self.run.requests > self.run.phases {
            return Err(ConfigError::ValidationError(format!(
                "run.requests {} exceeds run.phases {}",
                self.run.requests, self.run.phases
            )));
        }

        let last_port = u64::from(ensemble.base_port)
            + (self.run.threads as u64) * (ensemble.servers as u64) * u64::from(PORTS_PER_SERVER);
        if last_port > u64::from(u16::MAX) + 1 {
            return Err(ConfigError::ValidationError(format!(
                "{} workers of {} servers need ports beyond {} starting at {}",
                self.run.threads,
                ensemble.servers,
                u16::MAX,
                ensemble.base_port
            )));
        }
        Ok(())
    }

    pub fn ensemble_timing(&self) -> EnsembleTiming {
        EnsembleTiming {
            poll_attempts: self.timing.poll_attempts,
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
            join_timeout: Duration::from_millis(self.timing.join_timeout_ms),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            driver: self.run.scenario.driver(),
            phase_interval: Duration::from_millis(self.timing.phase_interval_ms),
            mean_start_stop: Duration::from_millis(self.timing.mean_start_stop_ms),
            completion_timeout: Duration::from_millis(self.timing.completion_timeout_ms),
            request_settle: Duration::from_millis(self.timing.request_settle_ms),
            faults: self.run.faults,
            fault_policy: self.run.fault_policy,
            max_faults_per_round: self.run.max_faults_per_round,
        }
    }

    pub fn harness_shape(&self) -> HarnessShape {
        HarnessShape {
            requests: self.run.requests,
            phases: self.run.phases,
            count: self.run.harnesses,
            max_ambiguous_phases: self.oracle.max_ambiguous_phases,
        }
    }

    /// Builds the batch this configuration describes.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            scenario: self.run.scenario,
            servers: self.ensemble.servers,
            quorum: self.ensemble.quorum,
            threads: self.run.threads,
            executions: self.run.executions,
            seed: self.run.seed,
            base_port: self.ensemble.base_port,
            timing: self.ensemble_timing(),
            engine: self.engine_config(),
            shape: self.harness_shape(),
        }
    }

    pub fn backend_latency(&self) -> Duration {
        Duration::from_millis(self.backend.latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use test_case::test_case;
    use zoocheck_sim::Driver;

    #[test]
    fn test_default_config() {
        let config = ZoocheckConfig::default();
        assert_eq!(config.run.scenario, ScenarioType::Baseline);
        assert_eq!(config.ensemble.servers, 3);
        assert_eq!(config.ensemble.base_port, DEFAULT_BASE_PORT);
        assert_eq!(config.oracle.max_ambiguous_phases, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timing_matches_libraries() {
        let config = ZoocheckConfig::default();
        assert_eq!(config.ensemble_timing(), EnsembleTiming::default());

        let engine = config.engine_config();
        let expected = EngineConfig::default();
        assert_eq!(engine.phase_interval, expected.phase_interval);
        assert_eq!(engine.completion_timeout, expected.completion_timeout);
        assert_eq!(engine.request_settle, expected.request_settle);
    }

    #[test]
    fn test_batch_config_carries_every_section() {
        let mut config = ZoocheckConfig::quick();
        config.run.scenario = ScenarioType::Random;
        config.run.threads = 4;
        config.run.faults = 2;
        config.run.seed = Some(7);
        config.ensemble.servers = 5;
        config.ensemble.quorum = Some(4);
        config.oracle.max_ambiguous_phases = 6;

        let batch = config.batch_config();
        assert_eq!(batch.scenario, ScenarioType::Random);
        assert_eq!(batch.engine.driver, Driver::Quorum);
        assert_eq!(batch.engine.faults, 2);
        assert_eq!(batch.threads, 4);
        assert_eq!(batch.seed, Some(7));
        assert_eq!(batch.servers, 5);
        assert_eq!(batch.quorum, Some(4));
        assert_eq!(batch.shape.max_ambiguous_phases, 6);
        assert_eq!(batch.timing.poll_interval, Duration::from_millis(5));
        assert!(batch.validate().is_ok());
    }

    #[test_case(0, None, 1, 11221 ; "zero servers")]
    #[test_case(3, Some(4), 1, 11221 ; "quorum above servers")]
    #[test_case(3, Some(0), 1, 11221 ; "zero quorum")]
    #[test_case(3, None, 0, 11221 ; "zero threads")]
    #[test_case(3, None, 2, 65530 ; "ports overflow")]
    fn test_validation_rejects(servers: usize, quorum: Option<usize>, threads: usize, base_port: u16) {
        let mut config = ZoocheckConfig::default();
        config.ensemble.servers = servers;
        config.ensemble.quorum = quorum;
        config.ensemble.base_port = base_port;
        config.run.threads = threads;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_last_port_may_be_max() {
        let mut config = ZoocheckConfig::default();
        // 3 servers use 9 ports: 65527..=65535
        config.ensemble.base_port = 65527;
        assert!(config.validate().is_ok());
        config.ensemble.base_port = 65528;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("batch.toml");
        fs::write(
            &path,
            r#"
[run]
scenario = "paper"
faults = 2
fault_policy = "at-most"

[backend]
ack_without_quorum = true
"#,
        )
        .expect("Failed to write config");

        let config = ZoocheckConfig::from_file(&path).expect("Failed to load config");
        assert_eq!(config.run.scenario, ScenarioType::Paper);
        assert_eq!(config.run.faults, 2);
        assert_eq!(config.run.fault_policy, FaultPolicy::AtMost);
        assert!(config.backend.ack_without_quorum);
        assert_eq!(config.ensemble, EnsembleSection::default());
    }

    #[test]
    fn test_from_file_errors() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            ZoocheckConfig::from_file(&missing),
            Err(ConfigError::ReadError { .. })
        ));

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "[run]\nscenario = \"divergence\"\n").expect("Failed to write config");
        assert!(matches!(
            ZoocheckConfig::from_file(&broken),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = ZoocheckConfig::quick();
        let text = toml::to_string(&config).expect("Failed to serialize");
        let parsed: ZoocheckConfig = toml::from_str(&text).expect("Failed to parse");
        assert_eq!(parsed, config);
    }
}
