//! Conflict-aware parallel call scheduling.
//!
//! A batch of calls is processed in rounds. Each round the planner assigns
//! calls, in order, to a fixed number of slots so that no two slots touch a
//! common key where either side writes it. Slots then run concurrently, each
//! on its own worker, and every call merges its writes into the shared state
//! as it finishes. A round ends with a barrier before the next one is planned.
//!
//! ```text
//! calls ──► plan_round ──► [slot 0] [slot 1] ... [slot W-1]
//!                             │        │             │
//!                             ▼        ▼             ▼
//!                      checkout → invoke → checkin → merge   (per call)
//!                             └────────┴─────────────┘
//!                                    barrier ──► next round
//! ```
//!
//! # Module Structure
//!
//! - `plan` - Pure round planning
//! - `hooks` - Per-call and per-round hooks
//! - `executor` - Rayon-backed round execution

mod executor;
mod hooks;
mod plan;

pub use executor::Scheduler;
pub use hooks::{CallHooks, NoHooks};
pub use plan::{RoundPlan, Slot, plan_all, plan_round};
