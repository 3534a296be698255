//! The runtime object tying configuration, pools and the scheduler together.

use std::sync::Arc;

use crate::call::{Call, CallOutput};
use crate::config::RuntimeConfig;
use crate::engine::{Bytecode, ScriptEngine};
use crate::error::Result;
use crate::pool::{PoolManager, PoolStats, PooledContext};
use crate::scheduler::{CallHooks, NoHooks, Scheduler};
use crate::state::{SharedState, StateMap};

/// One independent lyncs instance.
///
/// Owns its configuration, its program pools and its slot workers. Several
/// runtimes can coexist in one process.
pub struct Runtime<E: ScriptEngine> {
    config: Arc<RuntimeConfig>,
    pools: PoolManager<E>,
    scheduler: Scheduler,
}

impl<E: ScriptEngine> Runtime<E> {
    /// Create a runtime driving `engine`.
    pub fn new(engine: E, config: RuntimeConfig) -> Result<Self> {
        Self::with_shared_engine(Arc::new(engine), config)
    }

    /// Create a runtime around an engine that is also used elsewhere.
    pub fn with_shared_engine(engine: Arc<E>, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let scheduler = Scheduler::new(config.clone())?;
        let pools = PoolManager::new(engine, config.clone());
        tracing::debug!(
            "Runtime started: {} workers, {} calls per slot",
            config.workers,
            config.slot_capacity
        );
        Ok(Self {
            config,
            pools,
            scheduler,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pools(&self) -> &PoolManager<E> {
        &self.pools
    }

    pub fn engine(&self) -> &Arc<E> {
        self.pools.engine()
    }

    pub fn load_from_source(&self, name: &str, source: &str) -> Result<()> {
        self.pools.load_from_source(name, source)
    }

    pub fn load_from_bytecode(&self, name: &str, bytecode: impl Into<Bytecode>) -> Result<()> {
        self.pools.load_from_bytecode(name, bytecode)
    }

    pub fn destroy(&self, name: &str) -> Result<()> {
        self.pools.destroy(name)
    }

    pub fn checkout(&self, name: &str) -> Result<PooledContext<'_, E>> {
        self.pools.checkout(name)
    }

    pub fn list(&self) -> Result<Vec<PoolStats>> {
        self.pools.list()
    }

    /// Run `calls` against `state` without hooks.
    pub fn execute(&self, calls: &[Call], state: &SharedState) -> Vec<Result<CallOutput>> {
        self.scheduler.run(&self.pools, calls, state, &NoHooks)
    }

    /// Run `calls` against `state`, invoking `hooks` around each call and round.
    pub fn execute_with_hooks(
        &self,
        calls: &[Call],
        state: &SharedState,
        hooks: &dyn CallHooks,
    ) -> Vec<Result<CallOutput>> {
        self.scheduler.run(&self.pools, calls, state, hooks)
    }

    /// Run `calls` against a plain map, locking it only for this run.
    pub fn execute_map(&self, calls: &[Call], map: &mut StateMap) -> Vec<Result<CallOutput>> {
        let state = SharedState::from(std::mem::take(map));
        let results = self.execute(calls, &state);
        *map = state.into_inner();
        results
    }
}
