//! zoocheck command line.
//!
//! Runs fault-injection batches against a replicated coordination service
//! and exposes the sequential-consistency oracle for offline use.
//!
//! # Quick Start
//!
//! ```bash
//! # Ten runs of the per-phase fault budget scenario with two faults each
//! zoocheck run --scenario paper --faults 2 --executions 10
//!
//! # Legal final states when phase 0 ran and phase 2 may have run
//! zoocheck oracle harness.toml --executed 0 --maybe 2
//!
//! # How the scheduler spreads three faults over four phases
//! zoocheck faults --rounds 4 --budget 3
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zoocheck_sim::{FaultPolicy, ScenarioType};

/// zoocheck - fault injection and sequential-consistency checking for
/// replicated coordination services.
#[derive(Parser)]
#[command(name = "zoocheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of scenario executions against the in-memory ensemble.
    Run(RunArgs),

    /// Print the legal final states of a harness.
    Oracle {
        /// Harness file (TOML, or JSON with a .json extension).
        harness: PathBuf,

        /// Phases that definitely executed (comma separated).
        #[arg(short, long, value_delimiter = ',')]
        executed: Vec<usize>,

        /// Phases that may have executed (comma separated).
        #[arg(short, long, value_delimiter = ',')]
        maybe: Vec<usize>,

        /// Check an observed state (one value per key, comma separated).
        #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
        observed: Option<Vec<i64>>,

        /// Show a serialization producing each state.
        #[arg(short, long, conflicts_with = "maybe")]
        witness: bool,

        /// Most maybe-executed phases to enumerate.
        #[arg(long)]
        max_ambiguous: Option<usize>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Sample fault sequences and show how often each one is drawn.
    Faults {
        /// Phases of a run.
        #[arg(short, long, default_value = "3")]
        rounds: usize,

        /// Faults of a run.
        #[arg(short, long, default_value = "2")]
        budget: usize,

        /// Faults allowed in one phase (defaults to the budget).
        #[arg(short, long)]
        max_per_round: Option<usize>,

        #[arg(short, long, value_enum, default_value = "exact")]
        policy: PolicyArg,

        /// Runs to sample.
        #[arg(short, long, default_value = "10000")]
        samples: usize,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Count or list every harness of a shape.
    Harnesses {
        #[arg(short, long, default_value = "2")]
        keys: usize,

        #[arg(short, long, default_value = "3")]
        nodes: usize,

        #[arg(short, long, default_value = "2")]
        requests: usize,

        #[arg(short, long, default_value = "3")]
        phases: usize,

        /// List harnesses instead of only counting them.
        #[arg(short, long)]
        list: bool,

        /// Most harnesses to list.
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List available scenarios.
    Scenarios {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

/// Overrides on top of the layered configuration.
#[derive(Args)]
struct RunArgs {
    /// Read this file instead of the layered configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Short delays for smoke runs.
    #[arg(long)]
    quick: bool,

    #[arg(short, long, value_parser = parse_scenario)]
    scenario: Option<ScenarioType>,

    #[arg(long)]
    servers: Option<usize>,

    #[arg(long)]
    quorum: Option<usize>,

    /// Parallel workers per harness.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Runs per worker.
    #[arg(short, long)]
    executions: Option<usize>,

    /// Fault budget of one run.
    #[arg(short, long)]
    faults: Option<usize>,

    #[arg(long, value_enum)]
    fault_policy: Option<PolicyArg>,

    /// Harnesses drawn by the random-harness scenario.
    #[arg(long)]
    harnesses: Option<usize>,

    #[arg(long)]
    phases: Option<usize>,

    #[arg(long)]
    requests: Option<usize>,

    /// Fixed seed for every run.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    base_port: Option<u16>,

    /// Acknowledge writes without a quorum (a deliberately broken service).
    #[arg(long)]
    ack_without_quorum: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    Exact,
    AtMost,
}

impl From<PolicyArg> for FaultPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Exact => FaultPolicy::Exact,
            PolicyArg::AtMost => FaultPolicy::AtMost,
        }
    }
}

fn parse_scenario(name: &str) -> Result<ScenarioType, String> {
    name.parse().map_err(|e: zoocheck_sim::SimError| e.to_string())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Oracle {
            harness,
            executed,
            maybe,
            observed,
            witness,
            max_ambiguous,
            json,
        } => commands::oracle::run(&commands::oracle::OracleArgs {
            harness,
            executed,
            maybe,
            observed,
            witness,
            max_ambiguous,
            json,
        }),
        Commands::Faults {
            rounds,
            budget,
            max_per_round,
            policy,
            samples,
            seed,
            json,
        } => commands::faults::run(
            policy.into(),
            rounds,
            max_per_round.unwrap_or(budget),
            budget,
            samples,
            seed,
            json,
        ),
        Commands::Harnesses {
            keys,
            nodes,
            requests,
            phases,
            list,
            limit,
            json,
        } => commands::harnesses::run(keys, nodes, requests, phases, list.then_some(limit), json),
        Commands::Scenarios { json } => commands::scenarios::run(json),
    }
}
