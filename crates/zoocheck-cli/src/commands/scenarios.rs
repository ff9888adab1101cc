//! Scenario listing.

use anyhow::Result;
use serde::Serialize;
use zoocheck_sim::{Driver, HarnessShape, ScenarioType, SimRng};

use crate::style::{self, colors::SemanticStyle};

#[derive(Debug, Serialize)]
struct ScenarioInfo {
    name: &'static str,
    driver: Driver,
    /// `None` when harnesses are drawn at run time.
    harnesses: Option<usize>,
    description: &'static str,
}

fn catalog() -> Result<Vec<ScenarioInfo>> {
    ScenarioType::all()
        .iter()
        .map(|scenario| {
            let harnesses = match scenario {
                ScenarioType::RandomHarness => None,
                _ => Some(
                    scenario
                        .harnesses(&HarnessShape::default(), &mut SimRng::new(0))?
                        .len(),
                ),
            };
            Ok(ScenarioInfo {
                name: scenario.name(),
                driver: scenario.driver(),
                harnesses,
                description: scenario.description(),
            })
        })
        .collect()
}

pub fn run(json: bool) -> Result<()> {
    let catalog = catalog()?;
    if json {
        return style::print_json(&catalog);
    }

    let mut table = style::styled_table(&["Scenario", "Driver", "Harnesses", "Description"]);
    for info in &catalog {
        table.add_row(vec![
            comfy_table::Cell::new(info.name.header()),
            comfy_table::Cell::new(format!("{:?}", info.driver)),
            style::number_cell(info.harnesses.map_or_else(|| "random".to_string(), |n| n.to_string())),
            comfy_table::Cell::new(info.description),
        ]);
    }
    println!("{table}");
    style::print_hint("zoocheck run --scenario <name>");
    Ok(())
}
