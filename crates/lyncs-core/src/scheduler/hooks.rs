//! Per-call and per-round hooks for a scheduling run.

use crate::call::{Call, CallOutput, Session};
use crate::error::Result;

use super::plan::RoundPlan;

/// Hooks invoked by the scheduler around each call and each round.
///
/// Call hooks run on slot worker threads, concurrently for calls in
/// different slots.
pub trait CallHooks: Send + Sync {
    /// Called before the call executes, with the session about to be sent
    /// to the engine. Returning an error skips the invocation; the error is
    /// then passed to [`after_call`](Self::after_call).
    fn before_call(&self, _index: usize, _call: &Call, _session: &mut Session) -> Result<()> {
        Ok(())
    }

    /// Called with the invocation outcome. The returned value replaces it.
    ///
    /// `Ok(None)` left in place becomes a "nil result" invocation error.
    fn after_call(
        &self,
        _index: usize,
        _call: &Call,
        _session: &Session,
        outcome: Result<Option<CallOutput>>,
    ) -> Result<Option<CallOutput>> {
        outcome
    }

    /// Called when a round has been planned, before any of its calls run.
    fn on_round_started(&self, _round: usize, _plan: &RoundPlan) {}

    /// Called after every call of a round has finished and merged.
    fn on_round_completed(&self, _round: usize) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CallHooks for NoHooks {}
