//! Plan command implementation for Lyncs CLI.
//!
//! Reads a batch of calls and prints the rounds the scheduler would run,
//! without loading or invoking any program.

use std::fs;
use std::path::Path;

use anyhow::Context;
use lyncs_core::{Access, Call, RoundPlan, RuntimeConfig, plan_all};
use serde::Serialize;

#[derive(Serialize)]
struct PlanReport<'a> {
    workers: usize,
    slot_capacity: usize,
    calls: usize,
    rounds: &'a [RoundPlan],
}

/// Plan the calls in `calls_path` and print the result.
pub fn execute(calls_path: &Path, config: &RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let text = fs::read_to_string(calls_path)
        .with_context(|| format!("Calls file not found: {}", calls_path.display()))?;
    let calls: Vec<Call> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid calls file: {}", calls_path.display()))?;

    let rounds = plan_all(&calls, config.workers, config.slot_capacity);
    tracing::debug!("Planned {} calls into {} rounds", calls.len(), rounds.len());

    if json {
        let report = PlanReport {
            workers: config.workers,
            slot_capacity: config.slot_capacity,
            calls: calls.len(),
            rounds: &rounds,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Planned {} calls in {} rounds ({} workers, {} calls per slot)",
        calls.len(),
        rounds.len(),
        config.workers,
        config.slot_capacity
    );

    for (number, round) in rounds.iter().enumerate() {
        println!();
        println!("Round {}: calls {}..{}", number, round.start, round.end);
        for (index, slot) in round.slots.iter().enumerate() {
            if slot.is_empty() {
                continue;
            }
            let members: Vec<String> = slot
                .calls
                .iter()
                .map(|&call| format!("{}:{}.{}", call, calls[call].program, calls[call].function))
                .collect();
            println!("  slot {}: {}", index, members.join(" "));

            let footprint: Vec<String> = slot
                .footprint
                .iter()
                .map(|(key, access)| match access {
                    Access::Read => format!("{} (r)", key),
                    Access::Write => format!("{} (w)", key),
                })
                .collect();
            if !footprint.is_empty() {
                println!("    keys: {}", footprint.join(", "));
            }
        }
    }

    Ok(())
}
