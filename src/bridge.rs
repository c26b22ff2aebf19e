//! Per-session state shared between the façade and Lua callbacks.
//!
//! Callbacks invoked by Lua (the proxy `__call` metamethod, `_PYTHON.call`)
//! only receive `&Lua`, so the session stores a [`Bridge`] in the state's app
//! data and callbacks fetch a clone of it.

use mlua::Lua;

use crate::channel::ErrorChannel;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::Registry;

#[derive(Clone)]
pub(crate) struct Bridge {
    pub(crate) registry: Registry,
    pub(crate) channel: ErrorChannel,
    stack_limit: Option<usize>,
}

impl Bridge {
    pub(crate) fn new(stack_limit: Option<usize>) -> Self {
        Self {
            registry: Registry::new(),
            channel: ErrorChannel::default(),
            stack_limit,
        }
    }

    /// Attach this bridge to `lua`.
    pub(crate) fn install(&self, lua: &Lua) {
        lua.set_app_data(self.clone());
    }

    /// Fetch the bridge attached to `lua`.
    ///
    /// The app-data borrow is released before returning so the caller can
    /// re-enter Lua freely.
    pub(crate) fn of(lua: &Lua) -> BridgeResult<Bridge> {
        lua.app_data_ref::<Bridge>()
            .map(|bridge| bridge.clone())
            .ok_or_else(|| BridgeError::Engine("Lua state has no bridge attached".into()))
    }

    /// Reject a boundary crossing of `count` values above the stack size.
    pub(crate) fn check_stack(&self, count: usize) -> BridgeResult<()> {
        match self.stack_limit {
            Some(limit) if count > limit => Err(BridgeError::StackOverflow { count, limit }),
            _ => Ok(()),
        }
    }
}
