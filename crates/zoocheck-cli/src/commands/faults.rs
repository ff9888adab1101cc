//! Fault scheduler sampling.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use zoocheck_sim::{FaultPolicy, FaultScheduler, SimRng};

use crate::style::{self, colors::SemanticStyle};

#[derive(Debug, Serialize)]
struct Histogram {
    policy: FaultPolicy,
    rounds: usize,
    max_per_round: usize,
    budget: usize,
    /// Sequences the scheduler draws from.
    arrangements: u128,
    samples: usize,
    counts: Vec<SequenceCount>,
}

#[derive(Debug, Serialize)]
struct SequenceCount {
    faults: Vec<usize>,
    count: u64,
}

pub fn run(
    policy: FaultPolicy,
    rounds: usize,
    max_per_round: usize,
    budget: usize,
    samples: usize,
    seed: u64,
    json: bool,
) -> Result<()> {
    let histogram = sample(policy, rounds, max_per_round, budget, samples, seed)?;

    if json {
        return style::print_json(&histogram);
    }

    style::print_labeled("Policy", &format!("{policy:?}"));
    style::print_labeled(
        "Shape",
        &format!("{budget} faults over {rounds} rounds, at most {max_per_round} per round"),
    );
    style::print_labeled("Sequences", &histogram.arrangements.to_string().header());
    println!();

    let expected = samples as f64 / histogram.arrangements as f64;
    let mut table = style::styled_table(&["Faults per round", "Count", "Share", "Expected"]);
    for entry in &histogram.counts {
        table.add_row(vec![
            comfy_table::Cell::new(format!("{:?}", entry.faults)),
            style::number_cell(entry.count),
            style::number_cell(format!("{:.2}%", entry.count as f64 * 100.0 / samples as f64)),
            style::number_cell(format!("{expected:.0}")),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn sample(
    policy: FaultPolicy,
    rounds: usize,
    max_per_round: usize,
    budget: usize,
    samples: usize,
    seed: u64,
) -> Result<Histogram> {
    let mut scheduler =
        FaultScheduler::new(policy, rounds, max_per_round, budget, SimRng::new(seed));
    if !scheduler.is_satisfiable() {
        anyhow::bail!(
            "no sequence of {rounds} rounds with at most {max_per_round} faults each holds {budget} faults"
        );
    }

    let mut counts: BTreeMap<Vec<usize>, u64> = BTreeMap::new();
    for _ in 0..samples {
        *counts.entry(scheduler.sample_run()).or_default() += 1;
    }

    Ok(Histogram {
        policy,
        rounds,
        max_per_round,
        budget,
        arrangements: scheduler.arrangements(rounds, budget),
        samples,
        counts: counts
            .into_iter()
            .map(|(faults, count)| SequenceCount { faults, count })
            .collect(),
    })
}
