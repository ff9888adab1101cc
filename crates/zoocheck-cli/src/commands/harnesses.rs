//! Harness enumeration.

use anyhow::Result;
use serde::Serialize;
use zoocheck_oracle::{HarnessDef, HarnessIterator};

use crate::style::{self, colors::SemanticStyle};

#[derive(Debug, Serialize)]
struct Enumeration {
    keys: usize,
    nodes: usize,
    requests: usize,
    phases: usize,
    count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    harnesses: Vec<HarnessDef>,
}

/// Counts every harness of the shape and lists up to `list` of them.
pub fn run(
    keys: usize,
    nodes: usize,
    requests: usize,
    phases: usize,
    list: Option<usize>,
    json: bool,
) -> Result<()> {
    let enumeration = enumerate(keys, nodes, requests, phases, list.unwrap_or(0))?;

    if json {
        return style::print_json(&enumeration);
    }

    for (index, def) in enumeration.harnesses.iter().enumerate() {
        let phases: Vec<String> = def.phases.iter().map(ToString::to_string).collect();
        println!("{:>5}  [{}]", index.to_string().muted(), phases.join(", "));
    }
    if !enumeration.harnesses.is_empty() {
        println!();
    }
    println!(
        "{} harnesses with {requests} requests in {phases} phases ({nodes} nodes, {keys} keys)",
        enumeration.count.to_string().header()
    );
    if enumeration.harnesses.len() < enumeration.count && list.is_some() {
        style::print_hint("raise --limit to list more");
    }
    Ok(())
}

fn enumerate(
    keys: usize,
    nodes: usize,
    requests: usize,
    phases: usize,
    limit: usize,
) -> Result<Enumeration> {
    let mut count = 0;
    let mut harnesses = Vec::new();
    for harness in HarnessIterator::new(keys, nodes, requests, phases)? {
        if harnesses.len() < limit {
            harnesses.push(harness.to_def());
        }
        count += 1;
    }
    Ok(Enumeration {
        keys,
        nodes,
        requests,
        phases,
        count,
        harnesses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_limit() {
        let full = enumerate(2, 3, 1, 1, usize::MAX).unwrap();
        let limited = enumerate(2, 3, 1, 1, 2).unwrap();
        assert!(full.count > 0);
        assert_eq!(full.harnesses.len(), full.count);
        assert_eq!(limited.count, full.count);
        assert_eq!(limited.harnesses, full.harnesses[..2].to_vec());
    }

    #[test]
    fn test_impossible_shape_fails() {
        assert!(enumerate(2, 3, 4, 3, 0).is_err());
    }
}
