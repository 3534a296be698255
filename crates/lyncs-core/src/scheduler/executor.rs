//! Parallel round executor.
//!
//! Runs the rounds produced by the planner. Each non-empty slot of a round is
//! handed to one worker of a dedicated Rayon pool; a slot runs its calls in
//! order, each to completion. The next round starts only after every slot of
//! the current one has finished merging into the shared state.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;

use crate::call::{Call, CallOutput, Session};
use crate::config::RuntimeConfig;
use crate::engine::ScriptEngine;
use crate::error::{Error, Result};
use crate::pool::PoolManager;
use crate::state::SharedState;

use super::hooks::CallHooks;
use super::plan::{RoundPlan, Slot, plan_round};

/// Conflict-aware parallel call scheduler.
pub struct Scheduler {
    config: Arc<RuntimeConfig>,
    threads: rayon::ThreadPool,
}

impl Scheduler {
    /// Create a scheduler with one worker thread per configured slot.
    pub fn new(config: Arc<RuntimeConfig>) -> Result<Self> {
        config.validate()?;
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|index| format!("lyncs-slot-{}", index))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot start slot workers: {}", e)))?;
        Ok(Self { config, threads })
    }

    /// Run `calls` against `state`.
    ///
    /// Returns one entry per call, index-aligned with `calls`. A failing call
    /// never stops the run.
    pub fn run<E: ScriptEngine>(
        &self,
        pools: &PoolManager<E>,
        calls: &[Call],
        state: &SharedState,
        hooks: &dyn CallHooks,
    ) -> Vec<Result<CallOutput>> {
        let mut results = Vec::with_capacity(calls.len());
        let mut round = 0;

        while results.len() < calls.len() {
            let plan = plan_round(
                calls,
                results.len(),
                self.config.workers,
                self.config.slot_capacity,
            );
            self.log_plan(round, &plan);
            hooks.on_round_started(round, &plan);

            let slot_results: Vec<Vec<(usize, Result<CallOutput>)>> = self.threads.install(|| {
                plan.slots
                    .par_iter()
                    .filter(|slot| !slot.is_empty())
                    .map(|slot| self.run_slot(pools, slot, calls, state, hooks))
                    .collect()
            });

            let mut outcomes: Vec<_> = slot_results.into_iter().flatten().collect();
            outcomes.sort_unstable_by_key(|(index, _)| *index);
            results.extend(outcomes.into_iter().map(|(_, outcome)| outcome));
            debug_assert_eq!(results.len(), plan.end);

            hooks.on_round_completed(round);
            round += 1;
        }

        tracing::debug!("Ran {} calls in {} rounds", calls.len(), round);
        results
    }

    fn log_plan(&self, round: usize, plan: &RoundPlan) {
        let loads: Vec<usize> = plan.active_slots().map(|slot| slot.len()).collect();
        if self.config.debug {
            tracing::info!(
                "Round {}: calls {}..{} in {} slots {:?}",
                round,
                plan.start,
                plan.end,
                loads.len(),
                loads
            );
        } else {
            tracing::debug!(
                "Round {}: calls {}..{} in {} slots {:?}",
                round,
                plan.start,
                plan.end,
                loads.len(),
                loads
            );
        }
    }

    fn run_slot<E: ScriptEngine>(
        &self,
        pools: &PoolManager<E>,
        slot: &Slot,
        calls: &[Call],
        state: &SharedState,
        hooks: &dyn CallHooks,
    ) -> Vec<(usize, Result<CallOutput>)> {
        slot.calls
            .iter()
            .map(|&index| (index, run_call(pools, index, &calls[index], state, hooks)))
            .collect()
    }
}

/// Execute one call and merge its authorized writes.
fn run_call<E: ScriptEngine>(
    pools: &PoolManager<E>,
    index: usize,
    call: &Call,
    state: &SharedState,
    hooks: &dyn CallHooks,
) -> Result<CallOutput> {
    let mut session = Session {
        index,
        program: call.program.clone(),
        function: call.function.clone(),
        state: state.snapshot(call.keys.keys())?,
        payload: call.payload.clone(),
    };

    // Engine and hook code must not unwind through the slot worker.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let outcome = hooks
            .before_call(index, call, &mut session)
            .and_then(|()| pools.call(&call.program, &call.function, &session));
        hooks.after_call(index, call, &session, outcome)
    }))
    .unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        tracing::error!(
            "Call {} ({}.{}) panicked: {}",
            index,
            call.program,
            call.function,
            message
        );
        Err(Error::Invocation {
            program: call.program.clone(),
            function: call.function.clone(),
            message: format!("panicked: {}", message),
        })
    });

    let mut output = match outcome {
        Ok(Some(output)) => output,
        Ok(None) => return Err(Error::nil_result(&call.program, &call.function)),
        Err(e) => {
            tracing::debug!("Call {} ({}.{}) failed: {}", index, call.program, call.function, e);
            return Err(e);
        }
    };

    let produced = output.writes.len();
    output.writes.retain(|key, _| call.keys.can_write(key));
    if output.writes.len() < produced {
        tracing::warn!(
            "Call {} ({}.{}) wrote {} undeclared keys; discarded",
            index,
            call.program,
            call.function,
            produced - output.writes.len()
        );
    }

    state.apply(&output.writes)?;
    Ok(output)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
