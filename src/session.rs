//! Session façade: one Lua state plus the bridge state attached to it.
//!
//! ```text
//! open ──► evaluate / register (any number, possibly nested) ──► close
//! ```
//!
//! A session is single-threaded: it is neither `Send` nor `Sync`, and the
//! embedding application must not drive it from several threads. Calls may
//! nest (Lua calls Python calls Lua), and each nesting level reports its own
//! failures.

use mlua::{Lua, LuaOptions, MultiValue, Value};
use pyo3::prelude::*;

use crate::bridge::Bridge;
use crate::channel::{self, relay};
use crate::config::SessionConfig;
use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::proxy;

/// A running Lua state wired to Python.
pub struct Session {
    lua: Lua,
    bridge: Bridge,
    config: SessionConfig,
}

impl Session {
    /// Create a Lua state with the configured libraries, the `_PYTHON`
    /// table and the warning hook installed.
    pub fn open(config: SessionConfig) -> BridgeResult<Self> {
        let lua = Lua::new_with(config.libraries, LuaOptions::new()).map_err(relay)?;
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit).map_err(relay)?;
        }

        let bridge = Bridge::new(config.stack_size);
        bridge.install(&lua);
        channel::install(&lua);
        proxy::install(&lua).map_err(relay)?;

        log::debug!(
            "opened Lua session (stack size {:?}, memory limit {:?})",
            config.stack_size,
            config.memory_limit
        );
        Ok(Self {
            lua,
            bridge,
            config,
        })
    }

    /// Run `code` and return what it returned: the value itself when there is
    /// exactly one, a tuple otherwise.
    ///
    /// Fails if Lua reports an error, or if a proxied Python call failed
    /// during the run, even when the script carried on and finished normally.
    pub fn evaluate<'py>(&self, py: Python<'py>, code: &str) -> BridgeResult<Bound<'py, PyAny>> {
        let scope = self.bridge.channel.enter();
        log::trace!("evaluating chunk at depth {}", self.bridge.channel.depth());
        let status = self
            .lua
            .load(code)
            .set_name(self.config.chunk_name.as_str())
            .call::<MultiValue>(())
            .map_err(relay);
        let host_failure = scope.finish();

        if let Some(err) = host_failure {
            if let Err(script) = &status {
                log::debug!("script failure superseded by an earlier host failure: {script}");
            }
            return Err(err);
        }

        let values: Vec<Value> = status?.into_iter().collect();
        let tuple = convert::to_host(py, &self.bridge, &values)?;
        convert::collapse(tuple)
    }

    /// Bind `callable` to the Lua global `name`.
    pub fn register(&self, name: &str, callable: &Bound<'_, PyAny>) -> BridgeResult<()> {
        if !callable.is_callable() {
            return Err(BridgeError::NotCallable(convert::type_name(callable)));
        }
        let function = proxy::export(&self.lua, &self.bridge, name, callable)?;
        self.lua.globals().set(name, function).map_err(relay)?;
        log::debug!("registered Python function '{name}'");
        Ok(())
    }

    /// Number of Python references currently held by the Lua side.
    pub fn retained(&self) -> usize {
        self.bridge.registry.len()
    }

    /// Run a full Lua garbage collection cycle.
    pub fn collect_garbage(&self) -> BridgeResult<()> {
        self.lua.gc_collect().map_err(relay)
    }

    /// Release the Lua state and every Python reference it still holds.
    pub fn close(self) {
        let Session { lua, bridge, .. } = self;
        // Collecting the state finalizes every proxy; anything still
        // registered afterwards is released by the clear.
        drop(lua);
        let leftover = bridge.registry.clear();
        log::debug!("closed Lua session ({leftover} references released at close)");
    }

    #[cfg(test)]
    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    #[cfg(test)]
    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_unsafe_libraries() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = SessionConfig {
            libraries: mlua::StdLib::ALL,
            ..SessionConfig::default()
        };
        assert!(matches!(Session::open(config), Err(BridgeError::Engine(_))));
    }

    #[test]
    fn host_failure_wins_over_later_script_error() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let session = Session::open(SessionConfig::default()).unwrap();
            let failing = py
                .eval(c"lambda: 1 // 0", None, None)
                .unwrap();
            session.register("failing", &failing).unwrap();

            // `failing()` yields no values, so the arithmetic raises in Lua too.
            let err = session.evaluate(py, "return failing() + 1").unwrap_err();
            match err {
                BridgeError::Host(pyerr) => {
                    assert!(pyerr.is_instance_of::<pyo3::exceptions::PyZeroDivisionError>(py))
                }
                other => panic!("unexpected {other:?}"),
            }
        });
    }

    #[test]
    fn channel_is_balanced_after_each_evaluation() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let session = Session::open(SessionConfig::default()).unwrap();
            let _ = session.evaluate(py, "error('x')");
            let _ = session.evaluate(py, "return 1");
            assert_eq!(session.bridge().channel.depth(), 0);
        });
    }

    #[test]
    fn close_releases_everything() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let function = py.eval(c"lambda: None", None, None).unwrap();
            let before = function.get_refcnt();

            let session = Session::open(SessionConfig::default()).unwrap();
            session.register("f", &function).unwrap();
            session.register("g", &function).unwrap();
            assert_eq!(session.retained(), 2);
            assert_eq!(function.get_refcnt(), before + 2);

            session.close();
            assert_eq!(function.get_refcnt(), before);
        });
    }

    #[test]
    fn chunk_name_shows_up_in_messages() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let config = SessionConfig::default().with_chunk_name("=script");
            let session = Session::open(config).unwrap();
            let err = session.evaluate(py, "error('bad')").unwrap_err();
            assert!(err.to_string().starts_with("Lua script:1: bad"), "{err}");
        });
    }
}
