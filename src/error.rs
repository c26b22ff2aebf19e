//! Error type for the bridge and its mapping onto Python exceptions.
//!
//! Every marshaling, invocation and session call returns
//! [`Result<T, BridgeError>`](BridgeResult). Conversion into [`PyErr`] happens
//! only at the Python module boundary:
//!
//! - host failures carry the original Python exception and are re-raised as is
//! - translation failures raise `lua.TranslationError`
//! - engine resource failures raise `MemoryError` or `lua.EngineError`
//! - everything else raises `lua.LuaError`

use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyMemoryError, PyTypeError};
use pyo3::PyErr;

use crate::kind::{Direction, Kind};

create_exception!(
    lua,
    LuaError,
    PyException,
    "Failure raised by the embedded Lua engine or by the bridge."
);
create_exception!(
    lua,
    TranslationError,
    LuaError,
    "A value could not be translated between Lua and Python."
);
create_exception!(
    lua,
    EngineError,
    LuaError,
    "The Lua engine failed internally and aborted the evaluation."
);

/// Result alias used across the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Everything that can go wrong while crossing the boundary.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A value of an unsupported kind crossed the boundary.
    #[error("passing a {kind} {direction} is not supported")]
    Unsupported {
        /// Kind of the offending value.
        kind: Kind,
        /// Direction it was travelling.
        direction: Direction,
    },
    /// A Python number that is neither an `int` nor a `float`.
    #[error("unknown number type '{0}'")]
    UnknownNumber(String),
    /// A supported value that still failed to convert (bad text, huge int).
    #[error("cannot translate value {direction}: {message}")]
    Translation {
        /// Direction it was travelling.
        direction: Direction,
        /// Underlying reason.
        message: String,
    },

    /// The callee of a proxied call is not a proxied Python function.
    #[error("trying to call a non-Python function as one")]
    NotAProxy,
    /// The proxy's handle refers to something that is not callable.
    #[error("trying to call a non-callable Python object")]
    NotCallableProxy,
    /// The proxy's handle does not resolve to a retained host object.
    #[error("the Lua copy of the Python function has been corrupted")]
    CorruptedProxy,
    /// `register` was given something that is not callable.
    #[error("parameter 2 must be callable, not '{0}'")]
    NotCallable(String),

    /// A Python exception raised by host code during a proxied call.
    #[error("{0}")]
    Host(#[from] PyErr),
    /// A Lua syntax or runtime error.
    #[error("Lua {0}")]
    Script(String),

    /// The Lua allocator ran out of memory.
    #[error("Lua ran out of memory: {0}")]
    OutOfMemory(String),
    /// Lua failed while running its error handler.
    #[error("error in the Lua error handler: {0}")]
    ErrorHandler(String),
    /// Any other internal Lua engine failure.
    #[error("Lua engine failure: {0}")]
    Engine(String),
    /// More values crossed in one go than the session's stack size allows.
    #[error("{count} values exceed the session stack size of {limit}")]
    StackOverflow {
        /// Number of values that tried to cross.
        count: usize,
        /// Configured stack size.
        limit: usize,
    },

    /// The session was used after `close`.
    #[error("the Lua state is closed")]
    Closed,
}

impl BridgeError {
    pub(crate) fn unsupported(kind: Kind, direction: Direction) -> Self {
        BridgeError::Unsupported { kind, direction }
    }

    pub(crate) fn translation(direction: Direction, message: impl ToString) -> Self {
        BridgeError::Translation {
            direction,
            message: message.to_string(),
        }
    }

    /// True for failures caused by a value that could not cross the boundary.
    pub fn is_translation(&self) -> bool {
        matches!(
            self,
            BridgeError::Unsupported { .. }
                | BridgeError::UnknownNumber(_)
                | BridgeError::Translation { .. }
        )
    }

    /// True for failures of the engine itself rather than of the script.
    pub fn is_engine(&self) -> bool {
        matches!(
            self,
            BridgeError::OutOfMemory(_)
                | BridgeError::ErrorHandler(_)
                | BridgeError::Engine(_)
                | BridgeError::StackOverflow { .. }
        )
    }
}

impl From<BridgeError> for PyErr {
    fn from(err: BridgeError) -> PyErr {
        let message = err.to_string();
        match err {
            BridgeError::Host(original) => original,
            BridgeError::NotCallable(_) => PyTypeError::new_err(message),
            BridgeError::OutOfMemory(_) => PyMemoryError::new_err(message),
            ref other if other.is_translation() => TranslationError::new_err(message),
            ref other if other.is_engine() => EngineError::new_err(message),
            _ => LuaError::new_err(message),
        }
    }
}
