//! Python callables and capsules living inside Lua.
//!
//! A Python callable crosses into Lua as a [`PyFunction`] userdata: a record
//! holding a display name and the registry handle of the callable. Its
//! `__call` metamethod routes every call through [`invoke`], which marshals
//! the arguments to Python, calls the function and marshals the results back.
//!
//! A capsule crosses as a [`HostPointer`] userdata. Both own a
//! [`Retained`](crate::registry::Retained) guard, so the Python reference is
//! released when Lua collects the userdata.
//!
//! The global table `_PYTHON` exposes the same entry point as
//! `_PYTHON.call(f, ...)`.

use mlua::{AnyUserData, Lua, MetaMethod, MultiValue, UserData, UserDataFields, UserDataMethods, Value};
use pyo3::prelude::*;
use pyo3::types::PyCapsule;

use crate::bridge::Bridge;
use crate::channel::relay;
use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{Handle, Retained};
use crate::value::BridgeValue;

/// Language marker carried by every proxy.
pub(crate) const LANGUAGE: &str = "python";

/// Name given to callables that have neither `__qualname__` nor `__name__`.
pub(crate) const UNNAMED: &str = "unnamed Python function";

/// A Python callable as seen from Lua.
#[derive(Debug)]
pub(crate) struct PyFunction {
    name: String,
    retained: Retained,
}

impl PyFunction {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handle(&self) -> Handle {
        self.retained.handle()
    }
}

impl UserData for PyFunction {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("language", |_, _| Ok(LANGUAGE));
        fields.add_field_method_get("name", |_, this| Ok(this.name.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(
            MetaMethod::Call,
            |lua, (callee, args): (Value, MultiValue)| invoke(lua, &callee, args),
        );
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{LANGUAGE} function: {}", this.name))
        });
    }
}

/// A Python capsule as seen from Lua.
#[derive(Debug)]
pub(crate) struct HostPointer {
    address: usize,
    retained: Retained,
}

impl HostPointer {
    pub(crate) fn handle(&self) -> Handle {
        self.retained.handle()
    }
}

impl UserData for HostPointer {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("address", |_, this| Ok(this.address));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{LANGUAGE} pointer: {:#x}", this.address))
        });
    }
}

/// Wrap `callable` as a Lua proxy, retaining one Python reference.
pub(crate) fn export(
    lua: &Lua,
    bridge: &Bridge,
    name: &str,
    callable: &Bound<'_, PyAny>,
) -> BridgeResult<AnyUserData> {
    let retained = bridge.registry.retain(callable.clone().unbind())?;
    // On failure the record is dropped here and the reference released.
    lua.create_userdata(PyFunction {
        name: name.to_owned(),
        retained,
    })
    .map_err(relay)
}

/// Wrap `capsule` as Lua userdata, retaining one Python reference.
pub(crate) fn export_pointer(
    lua: &Lua,
    bridge: &Bridge,
    capsule: &Bound<'_, PyCapsule>,
) -> BridgeResult<AnyUserData> {
    let address = capsule.pointer() as usize;
    let retained = bridge.registry.retain(capsule.clone().into_any().unbind())?;
    lua.create_userdata(HostPointer { address, retained })
        .map_err(relay)
}

/// Name a Python callable for diagnostics on the Lua side.
pub(crate) fn display_name(callable: &Bound<'_, PyAny>) -> String {
    ["__qualname__", "__name__"]
        .iter()
        .find_map(|attr| callable.getattr(*attr).ok()?.extract::<String>().ok())
        .unwrap_or_else(|| UNNAMED.to_string())
}

fn lua_error(err: BridgeError) -> mlua::Error {
    mlua::Error::runtime(err)
}

/// Call the Python function behind `callee` with `args`.
///
/// Bridge faults (the callee is not a proxy, the handle is dead, the target
/// is not callable) raise a Lua error. A failure of the Python side (argument
/// translation, an exception, result translation) is recorded on the error
/// channel and the call returns zero values.
pub(crate) fn invoke(lua: &Lua, callee: &Value, args: MultiValue) -> mlua::Result<MultiValue> {
    let bridge = Bridge::of(lua).map_err(lua_error)?;
    let (name, handle) = match BridgeValue::from_script(callee) {
        Ok(BridgeValue::ExportedFunction { name, handle }) => (name, handle),
        Err(BridgeError::CorruptedProxy) => return Err(lua_error(BridgeError::CorruptedProxy)),
        _ => return Err(lua_error(BridgeError::NotAProxy)),
    };

    Python::with_gil(|py| {
        let function = bridge.registry.get(py, handle).map_err(lua_error)?;
        let function = function.bind(py);
        if !function.is_callable() {
            return Err(lua_error(BridgeError::NotCallableProxy));
        }

        log::trace!("calling Python function '{name}' with {} arguments", args.len());
        match call_host(py, lua, &bridge, function, args) {
            Ok(results) => Ok(results),
            Err(err) => {
                if let BridgeError::Host(pyerr) = &err {
                    log::debug!(
                        "Python function '{name}' raised: {}",
                        convert::pyerr_to_string(py, pyerr)
                    );
                } else {
                    log::debug!("call to Python function '{name}' failed: {err}");
                }
                bridge.channel.raise(err);
                Ok(MultiValue::new())
            }
        }
    })
}

fn call_host(
    py: Python<'_>,
    lua: &Lua,
    bridge: &Bridge,
    function: &Bound<'_, PyAny>,
    args: MultiValue,
) -> BridgeResult<MultiValue> {
    let slots: Vec<Value> = args.into_iter().collect();
    let args = convert::to_host(py, bridge, &slots)?;
    let result = function.call1(args)?;

    let pushed = convert::to_engine(lua, bridge, &result);
    log::trace!("returning {} values to Lua", pushed.count());
    if let Some(err) = pushed.failure {
        // The partially translated results still go back to Lua.
        bridge.channel.raise(err);
    }
    Ok(MultiValue::from_vec(pushed.values))
}

/// Install the `_PYTHON` table.
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
    let table = lua.create_table()?;
    table.set("language", LANGUAGE)?;
    table.set(
        "call",
        lua.create_function(|lua, (callee, args): (Value, MultiValue)| invoke(lua, &callee, args))?,
    )?;
    lua.globals().set("_PYTHON", table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::SessionConfig;

    #[test]
    fn proxy_exposes_its_record_fields() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let session = Session::open(SessionConfig::default()).unwrap();
            let function = py.eval(c"abs", None, None).unwrap();
            session.register("absolute", &function).unwrap();

            let fields = session
                .evaluate(py, "return absolute.language, absolute.name, tostring(absolute)")
                .unwrap();
            let fields: (String, String, String) = fields.extract().unwrap();
            assert_eq!(fields.0, "python");
            assert_eq!(fields.1, "absolute");
            assert_eq!(fields.2, "python function: absolute");
        });
    }

    #[test]
    fn display_name_prefers_qualname() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let function = py.eval(c"str.upper", None, None).unwrap();
            assert_eq!(display_name(&function), "str.upper");

            let partial = py
                .eval(c"__import__('functools').partial(max, 1)", None, None)
                .unwrap();
            assert_eq!(display_name(&partial), UNNAMED);
        });
    }

    #[test]
    fn dead_handle_raises_instead_of_dereferencing() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let session = Session::open(SessionConfig::default()).unwrap();
            let function = py.eval(c"abs", None, None).unwrap();
            session.register("absolute", &function).unwrap();

            session.bridge().registry.clear();
            let err = session.evaluate(py, "return absolute(-1)").unwrap_err();
            assert!(matches!(err, BridgeError::Script(_)));
            assert!(err.to_string().contains("has been corrupted"), "{err}");
        });
    }

    #[test]
    fn explicit_call_entry_rejects_non_proxies() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let session = Session::open(SessionConfig::default()).unwrap();
            let err = session.evaluate(py, "_PYTHON.call({}, 1)").unwrap_err();
            assert!(
                err.to_string().contains("trying to call a non-Python function as one"),
                "{err}"
            );

            let err = session.evaluate(py, "_PYTHON.call(print)").unwrap_err();
            assert!(err.to_string().contains("non-Python function"), "{err}");
        });
    }

    #[test]
    fn explicit_call_entry_invokes_proxies() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let session = Session::open(SessionConfig::default()).unwrap();
            let function = py.eval(c"lambda a, b: a * b", None, None).unwrap();
            session.register("mul", &function).unwrap();
            let result = session.evaluate(py, "return _PYTHON.call(mul, 6, 7)").unwrap();
            assert_eq!(result.extract::<f64>().unwrap(), 42.0);
        });
    }
}
