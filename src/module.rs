//! The `lua` Python extension module.
//!
//! ```python
//! import lua
//!
//! state = lua.lua_open()
//! lua.lua_register(state, "add", lambda a, b: a + b)
//! assert lua.lua(state, "return add(2, 3)") == 5
//! lua.lua_close(state)
//! ```
//!
//! The same operations are available as `LuaState` methods, and a state can
//! be used as a context manager that closes it on exit.
//!
//! **Sentinel behaviour:** a closed state raises `lua.LuaError` on use instead
//! of touching freed memory. Closing a state from inside one of its own
//! evaluations fails with the usual "already borrowed" error.

use pyo3::prelude::*;
use pyo3::types::PyTuple;

use crate::config::SessionConfig;
use crate::error::{BridgeError, EngineError, LuaError, TranslationError};
use crate::session::Session;

/// A Lua state owned by Python.
#[pyclass(module = "lua", name = "LuaState", unsendable)]
pub struct LuaState {
    session: Option<Session>,
}

impl LuaState {
    fn session(&self) -> PyResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| PyErr::from(BridgeError::Closed))
    }
}

#[pymethods]
impl LuaState {
    /// Open a state. `stack_size` <= 0 keeps the engine default.
    #[new]
    #[pyo3(signature = (stack_size = 0, memory_limit = None))]
    fn new(stack_size: i64, memory_limit: Option<usize>) -> PyResult<Self> {
        let config = SessionConfig::default()
            .with_stack_size(stack_size)
            .with_memory_limit(memory_limit);
        let session = Session::open(config)?;
        Ok(Self {
            session: Some(session),
        })
    }

    /// Run Lua code and return its result(s).
    fn execute(&self, py: Python<'_>, code: &str) -> PyResult<PyObject> {
        let result = self.session()?.evaluate(py, code)?;
        Ok(result.unbind())
    }

    /// Make `callable` available to Lua as the global `name`.
    fn register(&self, name: &str, callable: &Bound<'_, PyAny>) -> PyResult<()> {
        self.session()?.register(name, callable)?;
        Ok(())
    }

    /// Release the state. Closing twice is a no-op.
    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    #[getter]
    fn closed(&self) -> bool {
        self.session.is_none()
    }

    /// Python references currently held by the Lua side.
    #[getter]
    fn retained(&self) -> PyResult<usize> {
        Ok(self.session()?.retained())
    }

    /// Force a full Lua garbage collection.
    fn collect_garbage(&self) -> PyResult<()> {
        self.session()?.collect_garbage()?;
        Ok(())
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    #[pyo3(signature = (*_exc_info))]
    fn __exit__(&mut self, _exc_info: &Bound<'_, PyTuple>) -> bool {
        self.close();
        false
    }

    fn __repr__(&self) -> String {
        match &self.session {
            Some(session) => format!("<LuaState retained={}>", session.retained()),
            None => "<LuaState closed>".to_string(),
        }
    }
}

/// `lua_open([stack_size]) -> LuaState`
#[pyfunction]
#[pyo3(signature = (stack_size = 0, memory_limit = None))]
fn lua_open(stack_size: i64, memory_limit: Option<usize>) -> PyResult<LuaState> {
    LuaState::new(stack_size, memory_limit)
}

/// `lua_close(state) -> None`
#[pyfunction]
fn lua_close(mut state: PyRefMut<'_, LuaState>) {
    state.close();
}

/// `lua(state, code) -> value | tuple`
#[pyfunction]
#[pyo3(name = "lua")]
fn lua_execute(py: Python<'_>, state: PyRef<'_, LuaState>, code: &str) -> PyResult<PyObject> {
    state.execute(py, code)
}

/// `lua_register(state, name, callable) -> None`
#[pyfunction]
fn lua_register(
    state: PyRef<'_, LuaState>,
    name: &str,
    callable: &Bound<'_, PyAny>,
) -> PyResult<()> {
    state.register(name, callable)
}

/// Module initializer for `import lua`.
#[pymodule]
#[pyo3(name = "lua")]
pub fn lua_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let py = m.py();
    m.add_class::<LuaState>()?;
    m.add_function(wrap_pyfunction!(lua_open, m)?)?;
    m.add_function(wrap_pyfunction!(lua_close, m)?)?;
    m.add_function(wrap_pyfunction!(lua_execute, m)?)?;
    m.add_function(wrap_pyfunction!(lua_register, m)?)?;
    m.add("LuaError", py.get_type::<LuaError>())?;
    m.add("TranslationError", py.get_type::<TranslationError>())?;
    m.add("EngineError", py.get_type::<EngineError>())?;
    Ok(())
}
