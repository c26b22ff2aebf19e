//! Error channel between Lua and Python.
//!
//! Two paths feed it:
//!
//! 1. **Script failures.** `mlua` hands back the Lua error of a failed chunk;
//!    [`relay`] turns it into a [`BridgeError`] whose message carries the
//!    `Lua ` origin prefix. Lua `warn(...)` output goes to the log through the
//!    engine's warning hook.
//! 2. **Host failures inside a proxied call.** The proxy pushes zero results
//!    back to Lua and records the failure with [`ErrorChannel::raise`]. A
//!    script that ignores the missing results (or wraps the call in `pcall`)
//!    still finishes normally, so the façade must check the channel after
//!    every evaluation regardless of the Lua status.
//!
//! The channel keeps one slot per evaluation nesting level. A Python function
//! called from Lua may evaluate Lua again; that inner evaluation gets its own
//! slot and cannot overwrite the outer one. Within a level the first failure
//! wins.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::Lua;

use crate::error::BridgeError;

/// Message Lua produces when its error handler itself fails.
const ERROR_IN_ERROR_HANDLING: &str = "error in error handling";
const TRACEBACK_MARKER: &str = "\nstack traceback:";

#[derive(Clone, Default)]
pub(crate) struct ErrorChannel {
    levels: Rc<RefCell<Vec<Option<BridgeError>>>>,
}

impl ErrorChannel {
    /// Open a slot for one evaluation.
    pub(crate) fn enter(&self) -> Scope {
        let mut levels = self.levels.borrow_mut();
        levels.push(None);
        Scope {
            channel: self.clone(),
            depth: levels.len(),
            open: true,
        }
    }

    /// Record a failure in the innermost open slot.
    pub(crate) fn raise(&self, err: BridgeError) {
        let rejected = {
            let mut levels = self.levels.borrow_mut();
            match levels.last_mut() {
                Some(slot) if slot.is_none() => {
                    *slot = Some(err);
                    None
                }
                Some(_) => Some(err),
                None => {
                    log::warn!("host failure outside of any evaluation: {err}");
                    return;
                }
            }
        };
        if let Some(err) = rejected {
            log::debug!("keeping earlier failure, dropping: {err}");
        }
    }

    /// Number of evaluations currently in progress.
    pub(crate) fn depth(&self) -> usize {
        self.levels.borrow().len()
    }

    fn pop(&self, depth: usize) -> Option<BridgeError> {
        let mut levels = self.levels.borrow_mut();
        levels.truncate(depth);
        if levels.len() == depth {
            levels.pop().flatten()
        } else {
            None
        }
    }
}

/// An open slot. Dropping it without [`Scope::finish`] discards the slot.
#[must_use = "a scope must be finished to observe host failures"]
pub(crate) struct Scope {
    channel: ErrorChannel,
    depth: usize,
    open: bool,
}

impl Scope {
    /// Close the slot and return the failure recorded in it, if any.
    pub(crate) fn finish(mut self) -> Option<BridgeError> {
        self.open = false;
        self.channel.pop(self.depth)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.open {
            let _ = self.channel.pop(self.depth);
        }
    }
}

fn root_cause(err: &mlua::Error) -> &mlua::Error {
    let mut current = err;
    while let mlua::Error::CallbackError { cause, .. } = current {
        current = cause.as_ref();
    }
    current
}

/// Translate a Lua failure into the bridge taxonomy.
pub(crate) fn relay(err: mlua::Error) -> BridgeError {
    match root_cause(&err) {
        mlua::Error::MemoryError(message) => return BridgeError::OutOfMemory(message.clone()),
        // mlua reports LUA_ERRERR as a plain RuntimeError; Lua's fixed
        // message is the only thing that tells it apart.
        mlua::Error::RuntimeError(message) if message.starts_with(ERROR_IN_ERROR_HANDLING) => {
            return BridgeError::ErrorHandler(message.clone())
        }
        mlua::Error::StackError
        | mlua::Error::SafetyError(_)
        | mlua::Error::RecursiveMutCallback
        | mlua::Error::CallbackDestructed => return BridgeError::Engine(err.to_string()),
        _ => {}
    }
    let message = match root_cause(&err) {
        mlua::Error::SyntaxError { message, .. } | mlua::Error::RuntimeError(message) => {
            message.clone()
        }
        _ => err.to_string(),
    };
    BridgeError::Script(strip_traceback(&message))
}

/// Keep the error line, log the Lua stack traceback separately.
fn strip_traceback(message: &str) -> String {
    match message.split_once(TRACEBACK_MARKER) {
        Some((head, traceback)) => {
            log::debug!("Lua stack traceback:{traceback}");
            head.trim_end().to_string()
        }
        None => message.trim_end().to_string(),
    }
}

/// Route Lua `warn(...)` output to the log.
pub(crate) fn install(lua: &Lua) {
    let pending = RefCell::new(String::new());
    lua.set_warning_function(move |_, piece, incomplete| {
        let mut message = pending.borrow_mut();
        message.push_str(piece);
        if !incomplete {
            // "@on", "@off" and friends are control messages, not warnings.
            if !message.starts_with('@') {
                log::warn!("Lua warning: {message}");
            }
            message.clear();
        }
        Ok(())
    });
}
