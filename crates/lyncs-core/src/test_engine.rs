//! Recording script engine for unit tests.
//!
//! Program source is a whitespace-separated list of function names. The
//! tokens `!compile` and `!sandbox` make compilation fail. Function bodies are
//! Rust closures registered with [`RecordingEngine::on`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use crate::call::{CallOutput, Session};
use crate::engine::{Bytecode, ScriptEngine};
use crate::error::EngineError;

type Handler = Arc<dyn Fn(&Session) -> Result<Option<CallOutput>, EngineError> + Send + Sync>;

pub(crate) struct TestContext {
    functions: Vec<String>,
    pub(crate) resets: usize,
}

#[derive(Default)]
pub(crate) struct RecordingEngine {
    handlers: FxHashMap<String, Handler>,
    pub(crate) compiled: AtomicUsize,
    pub(crate) loaded: AtomicUsize,
    pub(crate) closed: AtomicUsize,
    pub(crate) invoked: AtomicUsize,
    fail_loads: AtomicBool,
}

impl RecordingEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on<F>(mut self, function: &str, handler: F) -> Self
    where
        F: Fn(&Session) -> Result<Option<CallOutput>, EngineError> + Send + Sync + 'static,
    {
        self.handlers.insert(function.to_string(), Arc::new(handler));
        self
    }

    /// Make `load` reject every bytecode while set. `compile` is unaffected.
    pub(crate) fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn loaded(&self) -> usize {
        self.loaded.load(Ordering::SeqCst)
    }

    fn parse(text: &str) -> Result<TestContext, EngineError> {
        let mut functions = Vec::new();
        for token in text.split_whitespace() {
            match token {
                "!compile" => return Err(EngineError::Compile("unexpected symbol".to_string())),
                "!sandbox" => return Err(EngineError::Sandbox("os.execute".to_string())),
                name => functions.push(name.to_string()),
            }
        }
        Ok(TestContext {
            functions,
            resets: 0,
        })
    }
}

impl ScriptEngine for RecordingEngine {
    type Context = TestContext;

    fn compile(&self, source: &str) -> Result<(TestContext, Bytecode), EngineError> {
        let context = Self::parse(source)?;
        self.compiled.fetch_add(1, Ordering::SeqCst);
        Ok((context, Bytecode::new(source.as_bytes().to_vec())))
    }

    fn load(&self, bytecode: &Bytecode) -> Result<TestContext, EngineError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(EngineError::Load("out of memory".to_string()));
        }
        let text = std::str::from_utf8(bytecode.as_bytes())
            .map_err(|e| EngineError::Load(e.to_string()))?;
        let context = Self::parse(text).map_err(|e| EngineError::Load(e.to_string()))?;
        self.loaded.fetch_add(1, Ordering::SeqCst);
        Ok(context)
    }

    fn has_entry_point(&self, context: &TestContext, name: &str) -> bool {
        context.functions.iter().any(|f| f == name)
    }

    fn invoke(
        &self,
        context: &mut TestContext,
        function: &str,
        session: &Session,
    ) -> Result<Option<CallOutput>, EngineError> {
        self.invoked.fetch_add(1, Ordering::SeqCst);
        if !self.has_entry_point(context, function) {
            return Err(EngineError::Runtime(format!(
                "attempt to call a nil value (global '{}')",
                function
            )));
        }
        match self.handlers.get(function) {
            Some(handler) => handler(session),
            None => Ok(None),
        }
    }

    fn reset(&self, context: &mut TestContext) {
        context.resets += 1;
    }

    fn close(&self, _context: TestContext) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
