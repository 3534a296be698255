//! The script engine seam.
//!
//! lyncs-core never interprets scripts itself. A [`ScriptEngine`] compiles and
//! sandboxes programs, instantiates contexts from bytecode and invokes
//! functions; the pool manager and scheduler only drive it through this trait.

use std::fmt;
use std::sync::Arc;

use crate::call::{CallOutput, Session};
use crate::error::EngineError;

/// Serialized program form used to spawn additional contexts cheaply.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Bytecode(Arc<[u8]>);

impl Bytecode {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytecode({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Bytecode {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Bytecode {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

/// An embeddable, sandboxing script runtime.
///
/// Contexts are owned by the pool manager. The engine sees a context only
/// for the duration of one method call.
pub trait ScriptEngine: Send + Sync {
    /// One isolated runtime instance.
    type Context: Send;

    /// Compile and sandbox `source`, returning a live context and the
    /// bytecode it was built from.
    fn compile(&self, source: &str) -> Result<(Self::Context, Bytecode), EngineError>;

    /// Instantiate a sandboxed context from previously produced bytecode.
    fn load(&self, bytecode: &Bytecode) -> Result<Self::Context, EngineError>;

    /// Whether `name` exists in the context and is callable.
    fn has_entry_point(&self, context: &Self::Context, name: &str) -> bool;

    /// Run `function` with `session` as input.
    ///
    /// `Ok(None)` means the function finished without producing a result.
    fn invoke(
        &self,
        context: &mut Self::Context,
        function: &str,
        session: &Session,
    ) -> Result<Option<CallOutput>, EngineError>;

    /// Clear per-call bindings before the context is reused.
    fn reset(&self, _context: &mut Self::Context) {}

    /// Release the context's resources.
    fn close(&self, context: Self::Context) {
        drop(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytecode_clone_shares_buffer() {
        let bytecode = Bytecode::new(vec![1, 2, 3]);
        let clone = bytecode.clone();
        assert_eq!(clone.as_bytes(), &[1, 2, 3]);
        assert!(std::ptr::eq(bytecode.as_bytes(), clone.as_bytes()));
    }

    #[test]
    fn test_bytecode_debug_hides_contents() {
        let bytecode = Bytecode::from(&b"\x1bLJ"[..]);
        assert_eq!(format!("{:?}", bytecode), "Bytecode(3 bytes)");
        assert!(Bytecode::default().is_empty());
    }
}
