//! Pools of reusable execution contexts, one pool per loaded program.
//!
//! Each pool keeps the program's bytecode so that extra contexts can be
//! spawned on demand, up to `RuntimeConfig::workers` live contexts. A context
//! that has been checked out `retire_after` times is closed when it comes
//! back instead of being returned to the idle set.
//!
//! Locks guard only the pool map and the per-pool bookkeeping. Compiling,
//! spawning, invoking and closing all happen outside them.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::call::{CallOutput, Session};
use crate::config::RuntimeConfig;
use crate::engine::{Bytecode, ScriptEngine};
use crate::error::{Error, Result, lock_error};

/// Identifies one execution context within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx_{}", self.0.simple())
    }
}

/// Snapshot of one pool, as reported by [`PoolManager::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub name: String,
    pub idle: usize,
    pub in_use: usize,
    pub has_source: bool,
    pub bytecode_len: usize,
}

struct Instance<C> {
    id: ContextId,
    context: C,
    uses: u64,
}

impl<C> Instance<C> {
    fn new(context: C) -> Self {
        Self {
            id: ContextId::new(),
            context,
            uses: 0,
        }
    }
}

struct Contexts<C> {
    idle: Vec<Instance<C>>,
    in_use: FxHashSet<ContextId>,
    /// Reservations for contexts being spawned outside the lock.
    spawning: usize,
    /// Set once the pool has been destroyed or replaced.
    closed: bool,
}

impl<C> Contexts<C> {
    fn live(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.spawning
    }

    fn busy(&self) -> usize {
        self.in_use.len() + self.spawning
    }
}

struct Pool<C> {
    name: String,
    source: Option<String>,
    bytecode: Bytecode,
    contexts: Mutex<Contexts<C>>,
}

impl<C> Pool<C> {
    fn new(name: &str, source: Option<String>, bytecode: Bytecode, seed: C) -> Self {
        Self {
            name: name.to_string(),
            source,
            bytecode,
            contexts: Mutex::new(Contexts {
                idle: vec![Instance::new(seed)],
                in_use: FxHashSet::default(),
                spawning: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Contexts<C>>> {
        self.contexts.lock().map_err(|e| lock_error("pool", e))
    }

    /// Mark the pool closed and hand back its idle contexts for closing.
    fn drain(&self) -> Vec<Instance<C>> {
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        contexts.closed = true;
        std::mem::take(&mut contexts.idle)
    }
}

/// Owns every execution context, keyed by program name.
pub struct PoolManager<E: ScriptEngine> {
    engine: Arc<E>,
    config: Arc<RuntimeConfig>,
    pools: Mutex<FxHashMap<String, Arc<Pool<E::Context>>>>,
}

impl<E: ScriptEngine> PoolManager<E> {
    pub fn new(engine: Arc<E>, config: Arc<RuntimeConfig>) -> Self {
        Self {
            engine,
            config,
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    fn lock_pools(&self) -> Result<MutexGuard<'_, FxHashMap<String, Arc<Pool<E::Context>>>>> {
        self.pools.lock().map_err(|e| lock_error("pool map", e))
    }

    fn pool(&self, name: &str) -> Result<Arc<Pool<E::Context>>> {
        self.lock_pools()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PoolNotFound(name.to_string()))
    }

    /// Compile `source` and register it under `name`, replacing any prior program.
    ///
    /// The prior pool is destroyed first, so a failed load leaves nothing
    /// registered under `name`. Fails with [`Error::InUse`] if the prior pool
    /// still has checked-out contexts.
    pub fn load_from_source(&self, name: &str, source: &str) -> Result<()> {
        check_name(name)?;
        self.destroy(name)?;

        let (context, bytecode) = self
            .engine
            .compile(source)
            .map_err(|e| e.at_load(name))?;
        self.install(name, Some(source.to_string()), bytecode, context)
    }

    /// Register pre-verified bytecode under `name`, replacing any prior program.
    pub fn load_from_bytecode(&self, name: &str, bytecode: impl Into<Bytecode>) -> Result<()> {
        check_name(name)?;
        self.destroy(name)?;

        let bytecode = bytecode.into();
        let context = self.spawn(name, &bytecode)?;
        self.install(name, None, bytecode, context)
    }

    fn install(
        &self,
        name: &str,
        source: Option<String>,
        bytecode: Bytecode,
        context: E::Context,
    ) -> Result<()> {
        if let Some(missing) = self
            .config
            .entry_points
            .iter()
            .find(|entry| !self.engine.has_entry_point(&context, entry))
        {
            self.engine.close(context);
            return Err(Error::EntryPointMissing {
                program: name.to_string(),
                entry_point: missing.clone(),
            });
        }

        let bytecode_len = bytecode.len();
        let pool = Arc::new(Pool::new(name, source, bytecode, context));

        // Another loader may have registered the same name meanwhile.
        let replaced = {
            let mut pools = match self.lock_pools() {
                Ok(pools) => pools,
                Err(e) => {
                    self.close_all(pool.drain());
                    return Err(e);
                }
            };
            if let Some(existing) = pools.get(name) {
                let busy_result = existing.lock().map(|contexts| contexts.busy());
                let busy = match busy_result {
                    Ok(busy) => busy,
                    Err(e) => {
                        drop(pools);
                        self.close_all(pool.drain());
                        return Err(e);
                    }
                };
                if busy > 0 {
                    drop(pools);
                    self.close_all(pool.drain());
                    return Err(Error::InUse {
                        program: name.to_string(),
                        in_use: busy,
                    });
                }
            }
            pools.insert(name.to_string(), pool)
        };
        if let Some(old) = replaced {
            self.close_all(old.drain());
        }

        tracing::info!("Loaded program {} ({} bytes of bytecode)", name, bytecode_len);
        Ok(())
    }

    /// Close every idle context of `name` and unregister it.
    ///
    /// Destroying an unknown name is a no-op. Returns [`Error::InUse`] and
    /// leaves the pool untouched if any context is checked out.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let drained = {
            let mut pools = self.lock_pools()?;
            let Some(pool) = pools.get(name).cloned() else {
                return Ok(());
            };

            let mut contexts = pool.lock()?;
            let busy = contexts.busy();
            if busy > 0 {
                return Err(Error::InUse {
                    program: name.to_string(),
                    in_use: busy,
                });
            }
            contexts.closed = true;
            let drained = std::mem::take(&mut contexts.idle);
            drop(contexts);

            pools.remove(name);
            drained
        };

        let count = drained.len();
        self.close_all(drained);
        tracing::info!("Destroyed pool {} ({} contexts closed)", name, count);
        Ok(())
    }

    /// Take a context of `name` for exclusive use.
    ///
    /// Reuses an idle context when one exists, otherwise spawns one from the
    /// stored bytecode while the pool is below its ceiling. Never waits: a
    /// pool at its ceiling with nothing idle fails with
    /// [`Error::PoolExhausted`]. The context is checked back in when the
    /// returned guard is dropped.
    pub fn checkout(&self, name: &str) -> Result<PooledContext<'_, E>> {
        let pool = self.pool(name)?;
        self.checkout_from(pool)
    }

    /// Checkout from a pool already looked up, which may have been
    /// destroyed since.
    fn checkout_from(&self, pool: Arc<Pool<E::Context>>) -> Result<PooledContext<'_, E>> {
        let name = pool.name.as_str();
        let reused = {
            let mut contexts = pool.lock()?;
            if contexts.closed {
                return Err(Error::PoolNotFound(name.to_string()));
            }
            match contexts.idle.pop() {
                Some(mut instance) => {
                    instance.uses += 1;
                    contexts.in_use.insert(instance.id);
                    Some(instance)
                }
                None if contexts.live() < self.config.workers => {
                    contexts.spawning += 1;
                    None
                }
                None => {
                    return Err(Error::PoolExhausted {
                        program: name.to_string(),
                        limit: self.config.workers,
                    });
                }
            }
        };

        let instance = match reused {
            Some(instance) => instance,
            None => self.spawn_reserved(&pool)?,
        };

        tracing::debug!(
            "Checked out {} from pool {} (use {})",
            instance.id,
            name,
            instance.uses
        );
        Ok(PooledContext {
            manager: self,
            pool,
            instance: Some(instance),
        })
    }

    /// Spawn a context into a reservation taken under the pool lock.
    fn spawn_reserved(&self, pool: &Pool<E::Context>) -> Result<Instance<E::Context>> {
        let spawned = self.spawn(&pool.name, &pool.bytecode);

        let mut contexts = pool.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        contexts.spawning -= 1;
        let context = spawned?;

        let mut instance = Instance::new(context);
        instance.uses = 1;
        contexts.in_use.insert(instance.id);
        tracing::debug!("Spawned {} for pool {}", instance.id, pool.name);
        Ok(instance)
    }

    fn spawn(&self, name: &str, bytecode: &Bytecode) -> Result<E::Context> {
        if bytecode.is_empty() {
            return Err(Error::Load {
                program: name.to_string(),
                message: "no bytecode to spawn from".to_string(),
            });
        }
        self.engine.load(bytecode).map_err(|e| match e.at_load(name) {
            Error::Compile { program, message } => Error::Load { program, message },
            other => other,
        })
    }

    fn checkin(&self, pool: &Pool<E::Context>, instance: Instance<E::Context>) {
        let retired = {
            let mut contexts = pool.contexts.lock().unwrap_or_else(PoisonError::into_inner);
            contexts.in_use.remove(&instance.id);
            if contexts.closed || instance.uses >= self.config.retire_after {
                Some(instance)
            } else {
                contexts.idle.push(instance);
                None
            }
        };

        if let Some(instance) = retired {
            tracing::debug!(
                "Retiring {} of pool {} after {} uses",
                instance.id,
                pool.name,
                instance.uses
            );
            self.engine.close(instance.context);
        }
    }

    /// Check out a context, reset it, invoke `function`, and check it back in.
    pub fn call(
        &self,
        name: &str,
        function: &str,
        session: &Session,
    ) -> Result<Option<CallOutput>> {
        let mut context = self.checkout(name)?;
        self.engine.reset(&mut context);
        self.engine
            .invoke(&mut context, function, session)
            .map_err(|e| e.at_call(name, function))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pool(name).is_ok()
    }

    /// Source the program was loaded from, if it was loaded from source.
    pub fn source(&self, name: &str) -> Result<Option<String>> {
        Ok(self.pool(name)?.source.clone())
    }

    pub fn bytecode(&self, name: &str) -> Result<Bytecode> {
        Ok(self.pool(name)?.bytecode.clone())
    }

    /// Statistics for every registered pool, sorted by name.
    pub fn list(&self) -> Result<Vec<PoolStats>> {
        let pools: Vec<_> = self.lock_pools()?.values().cloned().collect();

        let mut stats = pools
            .iter()
            .map(|pool| {
                let contexts = pool.lock()?;
                Ok(PoolStats {
                    name: pool.name.clone(),
                    idle: contexts.idle.len(),
                    in_use: contexts.busy(),
                    has_source: pool.source.is_some(),
                    bytecode_len: pool.bytecode.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    /// Close every idle context of every pool and unregister all pools.
    pub fn shutdown(&self) {
        let pools: Vec<_> = {
            let mut map = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            self.close_all(pool.drain());
        }
    }

    fn close_all(&self, instances: Vec<Instance<E::Context>>) {
        for instance in instances {
            self.engine.close(instance.context);
        }
    }
}

impl<E: ScriptEngine> Drop for PoolManager<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    Ok(())
}

/// A checked-out execution context.
///
/// Dereferences to the engine's context. Dropping the guard checks the
/// context back in, on every exit path.
pub struct PooledContext<'a, E: ScriptEngine> {
    manager: &'a PoolManager<E>,
    pool: Arc<Pool<E::Context>>,
    instance: Option<Instance<E::Context>>,
}

impl<E: ScriptEngine> PooledContext<'_, E> {
    pub fn id(&self) -> ContextId {
        self.instance().id
    }

    /// How many times this context has been checked out, this checkout included.
    pub fn uses(&self) -> u64 {
        self.instance().uses
    }

    pub fn program(&self) -> &str {
        &self.pool.name
    }

    /// Check the context back in now rather than at end of scope.
    pub fn checkin(self) {}

    fn instance(&self) -> &Instance<E::Context> {
        self.instance.as_ref().expect("context is held until drop")
    }
}

impl<E: ScriptEngine> std::fmt::Debug for PooledContext<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PooledContext");
        debug.field("program", &self.pool.name);
        if let Some(instance) = &self.instance {
            debug.field("id", &instance.id).field("uses", &instance.uses);
        }
        debug.finish()
    }
}

impl<E: ScriptEngine> Deref for PooledContext<'_, E> {
    type Target = E::Context;

    fn deref(&self) -> &E::Context {
        &self.instance().context
    }
}

impl<E: ScriptEngine> DerefMut for PooledContext<'_, E> {
    fn deref_mut(&mut self) -> &mut E::Context {
        &mut self
            .instance
            .as_mut()
            .expect("context is held until drop")
            .context
    }
}

impl<E: ScriptEngine> Drop for PooledContext<'_, E> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.manager.checkin(&self.pool, instance);
        }
    }
}
