//! Offline oracle queries on harness files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use zoocheck_oracle::{ConsistencyProperty, Harness, HarnessDef, State, Step, StepKind, key_path};

use crate::style::{self, colors::SemanticStyle};

pub struct OracleArgs {
    pub harness: PathBuf,
    pub executed: Vec<usize>,
    pub maybe: Vec<usize>,
    pub observed: Option<Vec<i64>>,
    pub witness: bool,
    pub max_ambiguous: Option<usize>,
    pub json: bool,
}

#[derive(Serialize)]
struct LegalState {
    values: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    witness: Option<Vec<Step>>,
}

#[derive(Serialize)]
struct Report {
    harness: HarnessDef,
    executed: BTreeSet<usize>,
    maybe: BTreeSet<usize>,
    states: Vec<LegalState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    violation: Option<String>,
}

pub fn run(args: &OracleArgs) -> Result<()> {
    let mut harness = load_harness(&args.harness)?;
    if let Some(limit) = args.max_ambiguous {
        harness = harness.with_max_ambiguous_phases(limit);
    }

    let executed: BTreeSet<usize> = args.executed.iter().copied().collect();
    let maybe: BTreeSet<usize> = args.maybe.iter().copied().collect();
    let report = evaluate(&harness, executed, maybe, args.observed.as_deref(), args.witness)?;

    if args.json {
        style::print_json(&report)?;
    } else {
        print_report(&harness, &report);
    }

    match report.violation {
        Some(violation) => anyhow::bail!("{violation}"),
        None => Ok(()),
    }
}

/// Reads a harness definition, as JSON for `.json` files and TOML otherwise.
pub fn load_harness(path: &Path) -> Result<Harness> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read harness file {}", path.display()))?;
    let def: HarnessDef = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON harness {}", path.display()))?
    } else {
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse TOML harness {}", path.display()))?
    };
    Ok(Harness::try_from(def)?)
}

fn evaluate(
    harness: &Harness,
    executed: BTreeSet<usize>,
    maybe: BTreeSet<usize>,
    observed: Option<&[i64]>,
    witness: bool,
) -> Result<Report> {
    let legal = harness.possible_states(&executed, &maybe)?;

    let exploration = if witness {
        Some(harness.explore(&executed)?)
    } else {
        None
    };
    let states = legal
        .iter()
        .map(|state| LegalState {
            values: state.values().to_vec(),
            witness: exploration
                .as_ref()
                .and_then(|e| e.witness(state))
                .map(<[Step]>::to_vec),
        })
        .collect();

    let violation = match observed {
        Some(values) => {
            if values.len() != harness.num_keys() {
                anyhow::bail!(
                    "observed state has {} values but the harness has {} keys",
                    values.len(),
                    harness.num_keys()
                );
            }
            ConsistencyProperty::new(legal)
                .check(&[State::from_values(values.to_vec())])
                .err()
                .map(|v| v.to_string())
        }
        None => None,
    };

    Ok(Report {
        harness: harness.to_def(),
        executed,
        maybe,
        states,
        observed: observed.map(<[i64]>::to_vec),
        violation,
    })
}

fn format_witness(harness: &Harness, steps: &[Step]) -> String {
    steps
        .iter()
        .map(|step| {
            let kind = match step.kind {
                StepKind::Write => "W",
                StepKind::Read => "R",
                StepKind::VirtualWrite => "VW",
            };
            let node = harness.phases()[step.phase]
                .node()
                .map_or_else(String::new, |node| format!("@{node}"));
            format!("{kind}{}{node}", step.phase)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_report(harness: &Harness, report: &Report) {
    println!("{} {harness}", "Harness:".header());
    style::print_labeled("Executed", &format!("{:?}", report.executed));
    style::print_labeled("Maybe", &format!("{:?}", report.maybe));
    println!();

    let mut columns: Vec<String> = (0..harness.num_keys()).map(key_path).collect();
    let with_witness = report.states.iter().any(|s| s.witness.is_some());
    if with_witness {
        columns.push("Witness".to_string());
    }
    let mut table = style::styled_table(&columns);
    for state in &report.states {
        let mut row: Vec<comfy_table::Cell> =
            state.values.iter().map(|v| style::number_cell(*v)).collect();
        if let Some(steps) = &state.witness {
            row.push(comfy_table::Cell::new(format_witness(harness, steps)));
        }
        table.add_row(row);
    }
    println!("{table}");
    println!(
        "{}",
        format!("({} legal states)", report.states.len()).muted()
    );

    match (&report.observed, &report.violation) {
        (_, Some(violation)) => style::print_error(violation),
        (Some(observed), None) => {
            style::print_success(&format!("observed state {observed:?} is legal"));
        }
        (None, None) => {}
    }
}
