//! Shared type taxonomy for values on either side of the bridge.
//!
//! Both runtimes classify their native values into the same seven kinds.
//! The marshalers in [`crate::convert`] branch on these kinds; classification
//! itself never fails and has no side effects.

use std::fmt;

use mlua::Value;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyCapsule, PyString, PyTuple};

use crate::proxy::PyFunction;

/// The kind of a value as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Python `None` / Lua `nil`.
    Nothing,
    /// Anything implementing the number protocol / a Lua number.
    Number,
    /// Python `str` or `bytes` / a Lua string.
    String,
    /// A Python callable / a Lua function.
    Function,
    /// A Python capsule / a Lua userdata that is not a proxy.
    Pointer,
    /// A Python tuple / a Lua table or a proxied Python function.
    Container,
    /// Everything else.
    Undefined,
}

impl Kind {
    /// Lower-case name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nothing => "nothing",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Function => "function",
            Kind::Pointer => "pointer",
            Kind::Container => "container",
            Kind::Undefined => "undefined",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which way a value is crossing the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Python → Lua.
    ToScript,
    /// Lua → Python.
    ToHost,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToScript => f.write_str("from Python to Lua"),
            Direction::ToHost => f.write_str("from Lua to Python"),
        }
    }
}

/// Classify a Python object.
///
/// Checks run in the order `None`, number, string, callable, capsule, tuple,
/// so an object satisfying several protocols gets the earliest kind.
pub fn classify_host(value: &Bound<'_, PyAny>) -> Kind {
    if value.is_none() {
        return Kind::Nothing;
    }
    // SAFETY: `value` is a live object and the GIL is held through `Bound`.
    if unsafe { ffi::PyNumber_Check(value.as_ptr()) } == 1 {
        return Kind::Number;
    }
    if value.is_instance_of::<PyString>() || value.is_instance_of::<PyBytes>() {
        return Kind::String;
    }
    if value.is_callable() {
        return Kind::Function;
    }
    if value.downcast::<PyCapsule>().is_ok() {
        return Kind::Pointer;
    }
    if value.is_instance_of::<PyTuple>() {
        return Kind::Container;
    }
    Kind::Undefined
}

/// Classify a Lua value.
///
/// Numeric strings stay strings; Lua 5.4 keeps the two types apart.
pub fn classify_script(value: &Value) -> Kind {
    match value {
        Value::Nil => Kind::Nothing,
        Value::Integer(_) | Value::Number(_) => Kind::Number,
        Value::String(_) => Kind::String,
        Value::Function(_) => Kind::Function,
        Value::LightUserData(_) => Kind::Pointer,
        Value::UserData(ud) if ud.is::<PyFunction>() => Kind::Container,
        Value::UserData(_) => Kind::Pointer,
        Value::Table(_) => Kind::Container,
        _ => Kind::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;
    use pyo3::types::PyList;

    fn host_kind(py: Python<'_>, expr: &std::ffi::CStr) -> Kind {
        let value = py.eval(expr, None, None).unwrap();
        classify_host(&value)
    }

    #[test]
    fn host_values_follow_precedence() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            assert_eq!(host_kind(py, c"None"), Kind::Nothing);
            assert_eq!(host_kind(py, c"3"), Kind::Number);
            assert_eq!(host_kind(py, c"2.5"), Kind::Number);
            assert_eq!(host_kind(py, c"True"), Kind::Number);
            assert_eq!(host_kind(py, c"1j"), Kind::Number);
            assert_eq!(host_kind(py, c"'text'"), Kind::String);
            assert_eq!(host_kind(py, c"b'raw'"), Kind::String);
            assert_eq!(host_kind(py, c"len"), Kind::Function);
            assert_eq!(host_kind(py, c"lambda: 1"), Kind::Function);
            assert_eq!(host_kind(py, c"(1, 2)"), Kind::Container);
            assert_eq!(host_kind(py, c"()"), Kind::Container);
            assert_eq!(host_kind(py, c"[1, 2]"), Kind::Undefined);
            assert_eq!(host_kind(py, c"{}"), Kind::Undefined);

            let capsule = PyCapsule::new(py, 7usize, None).unwrap();
            assert_eq!(classify_host(capsule.as_any()), Kind::Pointer);

            let list = PyList::empty(py);
            assert_eq!(classify_host(list.as_any()), Kind::Undefined);
        });
    }

    #[test]
    fn script_values_map_directly() {
        let _ = env_logger::builder().is_test(true).try_init();
        let lua = Lua::new();
        let kinds: Vec<Kind> = lua
            .load("return nil, 1, 1.5, '10', print, {}, true")
            .call::<mlua::MultiValue>(())
            .unwrap()
            .into_iter()
            .map(|value| classify_script(&value))
            .collect();
        assert_eq!(
            kinds,
            vec![
                Kind::Nothing,
                Kind::Number,
                Kind::Number,
                Kind::String,
                Kind::Function,
                Kind::Container,
                Kind::Undefined,
            ]
        );
        let light = Value::LightUserData(mlua::LightUserData(std::ptr::null_mut()));
        assert_eq!(classify_script(&light), Kind::Pointer);
    }
}
