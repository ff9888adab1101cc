//! Batch execution against the in-memory ensemble.

use anyhow::{Context, Result};
use zoocheck_cluster::MemoryBackend;
use zoocheck_config::ZoocheckConfig;
use zoocheck_sim::{BatchResults, BatchRunner, RunOutcome};

use crate::RunArgs;
use crate::style::{self, colors::SemanticStyle};

/// Runs one batch and fails if any run did not pass.
pub fn run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let batch = config.batch_config();
    let latency = config.backend_latency();
    let ack_without_quorum = config.backend.ack_without_quorum;

    if !args.json {
        println!(
            "Running {} x {} executions of {} ({} servers, {} faults)...",
            batch.threads.to_string().header(),
            batch.executions.to_string().header(),
            batch.scenario.name().code(),
            batch.servers,
            batch.engine.faults,
        );
    }

    let runner = BatchRunner::new(batch, move |worker| {
        MemoryBackend::new(worker as u64)
            .with_latency(latency)
            .with_ack_without_quorum(ack_without_quorum)
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let results = runtime.block_on(runner.run())?;

    if args.json {
        style::print_json(&results)?;
    } else {
        print_summary(&results);
    }

    if results.all_passed() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} run(s) failed",
            results.total() - results.passed,
            results.total()
        )
    }
}

/// Layered configuration (or the given file), then command line overrides.
fn resolve_config(args: &RunArgs) -> Result<ZoocheckConfig> {
    let mut config = match &args.config {
        Some(path) => ZoocheckConfig::from_file(path)?,
        None => ZoocheckConfig::load()?,
    };

    if args.quick {
        config.timing = ZoocheckConfig::quick().timing;
    }

    let run = &mut config.run;
    if let Some(scenario) = args.scenario {
        run.scenario = scenario;
    }
    if let Some(threads) = args.threads {
        run.threads = threads;
    }
    if let Some(executions) = args.executions {
        run.executions = executions;
    }
    if let Some(faults) = args.faults {
        run.faults = faults;
    }
    if let Some(policy) = args.fault_policy {
        run.fault_policy = policy.into();
    }
    if let Some(harnesses) = args.harnesses {
        run.harnesses = harnesses;
    }
    if let Some(phases) = args.phases {
        run.phases = phases;
    }
    if let Some(requests) = args.requests {
        run.requests = requests;
    }
    if args.seed.is_some() {
        run.seed = args.seed;
    }

    let ensemble = &mut config.ensemble;
    if let Some(servers) = args.servers {
        ensemble.servers = servers;
    }
    if args.quorum.is_some() {
        ensemble.quorum = args.quorum;
    }
    if let Some(base_port) = args.base_port {
        ensemble.base_port = base_port;
    }

    if args.ack_without_quorum {
        config.backend.ack_without_quorum = true;
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(results: &BatchResults) {
    println!();
    let mut table = style::styled_table(&[
        "Harness",
        "Runs",
        "Passed",
        "Assertion",
        "Infrastructure",
        "Matching",
    ]);
    for (index, harness) in results.harnesses.iter().enumerate() {
        let runs: Vec<_> = results.records.iter().filter(|r| r.harness == index).collect();
        let passed = runs.iter().filter(|r| r.run.passed()).count();
        let count = |outcome: RunOutcome| {
            runs.iter().filter(|r| r.run.outcome == outcome).count()
        };
        let phases: Vec<String> = harness.phases.iter().map(ToString::to_string).collect();
        table.add_row(vec![
            comfy_table::Cell::new(phases.join(", ")),
            style::number_cell(runs.len()),
            style::number_cell(passed),
            style::number_cell(count(RunOutcome::AssertionFailed)),
            style::number_cell(count(RunOutcome::InfrastructureFailed)),
            style::number_cell(count(RunOutcome::MatchingFailed)),
        ]);
    }
    println!("{table}");

    if results.all_passed() {
        style::print_success(&format!(
            "All {} runs passed",
            results.total().to_string().success()
        ));
    } else {
        style::print_error(&format!(
            "{} passed, {} assertion failures, {} infrastructure failures",
            results.passed.to_string().success(),
            results.assertion_failures.to_string().error(),
            results.infrastructure_failures.to_string().warning()
        ));
    }
    style::print_labeled(
        "Time",
        &format!(
            "{:.2}s ({:.1}% passed)",
            results.elapsed_secs,
            results.success_rate() * 100.0
        ),
    );
    if let Some(seed) = results.batch_seed {
        style::print_labeled("Batch seed", &seed.to_string().code());
    }

    if !results.failed_seeds.is_empty() {
        println!();
        println!("{}", "Failed seeds (reproduce with):".warning());
        for seed in &results.failed_seeds {
            let command = format!(
                "zoocheck run --scenario {} --seed {seed} --executions 1",
                results.scenario
            );
            println!("  {}", command.code());
        }
        style::print_hint("add --faults and --servers as in the failing batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use zoocheck_sim::ScenarioType;

    fn args(config: std::path::PathBuf) -> RunArgs {
        RunArgs {
            config: Some(config),
            quick: false,
            scenario: None,
            servers: None,
            quorum: None,
            threads: None,
            executions: None,
            faults: None,
            fault_policy: None,
            harnesses: None,
            phases: None,
            requests: None,
            seed: None,
            base_port: None,
            ack_without_quorum: false,
            json: false,
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("zoocheck.toml");
        fs::write(&path, "[run]\nscenario = \"paper\"\nfaults = 1\nexecutions = 4\n").unwrap();

        let mut args = args(path);
        args.quick = true;
        args.faults = Some(2);
        args.servers = Some(5);
        args.seed = Some(9);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.run.scenario, ScenarioType::Paper);
        assert_eq!(config.run.faults, 2);
        assert_eq!(config.run.executions, 4);
        assert_eq!(config.run.seed, Some(9));
        assert_eq!(config.ensemble.servers, 5);
        assert_eq!(config.timing, ZoocheckConfig::quick().timing);
    }

    #[test]
    fn test_overrides_are_validated() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("zoocheck.toml");
        fs::write(&path, "").unwrap();

        let mut args = args(path);
        args.servers = Some(3);
        args.quorum = Some(4);
        assert!(resolve_config(&args).is_err());
    }
}
