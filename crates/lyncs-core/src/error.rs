//! Error types for lyncs-core.

use std::sync::PoisonError;

use thiserror::Error;

/// Result type for lyncs-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lyncs-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The script engine rejected the program source.
    #[error("compilation failed for program {program}: {message}")]
    Compile { program: String, message: String },

    /// The program tried to reach outside its sandbox while loading.
    #[error("sandbox violation in program {program}: {message}")]
    SandboxViolation { program: String, message: String },

    /// The program loaded but lacks a required entry point.
    #[error("program {program} is missing required entry point `{entry_point}`")]
    EntryPointMissing { program: String, entry_point: String },

    /// Bytecode could not be instantiated.
    #[error("failed to load bytecode for program {program}: {message}")]
    Load { program: String, message: String },

    /// Every context of the pool is checked out and the pool is at its ceiling.
    #[error("pool {program} exhausted ({limit} contexts in use)")]
    PoolExhausted { program: String, limit: usize },

    /// The pool still has checked-out contexts.
    #[error("pool {program} is in use ({in_use} contexts checked out)")]
    InUse { program: String, in_use: usize },

    /// No pool is registered under this name.
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    /// Program names must be non-empty.
    #[error("program name must not be empty")]
    EmptyName,

    /// The engine reported a runtime failure, or produced no result at all.
    #[error("invocation of {program}.{function} failed: {message}")]
    Invocation {
        program: String,
        function: String,
        message: String,
    },

    /// The engine returned a result the core cannot interpret.
    #[error("malformed result from {program}.{function}: {message}")]
    MalformedResult {
        program: String,
        function: String,
        message: String,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be decoded.
    #[error("configuration parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    StatePoisoned(String),
}

impl Error {
    /// Whether the caller may retry the same operation later.
    ///
    /// `InUse` clears once contexts are checked back in, `PoolExhausted`
    /// once any context is released.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::InUse { .. } | Error::PoolExhausted { .. })
    }

    pub(crate) fn nil_result(program: &str, function: &str) -> Self {
        Error::Invocation {
            program: program.to_string(),
            function: function.to_string(),
            message: "nil result".to_string(),
        }
    }
}

/// Convert a poisoned lock into [`Error::StatePoisoned`].
pub(crate) fn lock_error<T>(what: &str, e: PoisonError<T>) -> Error {
    tracing::warn!("{} lock poisoned", what);
    Error::StatePoisoned(format!("{} lock poisoned (thread panicked): {}", what, e))
}

/// Failures reported by a [`ScriptEngine`](crate::engine::ScriptEngine).
///
/// The core attaches program and function names when converting these
/// into [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("sandbox violation: {0}")]
    Sandbox(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("malformed result: {0}")]
    Malformed(String),
}

impl EngineError {
    /// Attach the program name to a load-time failure.
    pub(crate) fn at_load(self, program: &str) -> Error {
        let program = program.to_string();
        match self {
            EngineError::Compile(message) => Error::Compile { program, message },
            EngineError::Sandbox(message) => Error::SandboxViolation { program, message },
            EngineError::Load(message)
            | EngineError::Runtime(message)
            | EngineError::Malformed(message) => Error::Load { program, message },
        }
    }

    /// Attach program and function names to an invocation failure.
    pub(crate) fn at_call(self, program: &str, function: &str) -> Error {
        let program = program.to_string();
        let function = function.to_string();
        match self {
            EngineError::Malformed(message) => Error::MalformedResult {
                program,
                function,
                message,
            },
            other => Error::Invocation {
                program,
                function,
                message: other.to_string(),
            },
        }
    }
}
