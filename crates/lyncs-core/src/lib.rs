//! Core engine for lyncs: pooled script contexts and parallel call scheduling.
//!
//! This crate provides:
//! - A pool manager owning reusable execution contexts per named program
//! - A conflict-aware scheduler running batches of calls in parallel rounds
//! - Shared key-value state merged between calls
//! - The [`ScriptEngine`] trait through which scripts are compiled and invoked
//!
//! Everything hangs off an explicit [`Runtime`]; there is no global state.

pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod runtime;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod test_engine;

pub use call::{Access, Call, CallOutput, KeyRules, Session};
pub use config::RuntimeConfig;
pub use engine::{Bytecode, ScriptEngine};
pub use error::{EngineError, Error, Result};
pub use pool::{ContextId, PoolManager, PoolStats, PooledContext};
pub use runtime::Runtime;
pub use scheduler::{CallHooks, NoHooks, RoundPlan, Scheduler, Slot, plan_all, plan_round};
pub use state::{SharedState, StateMap};
