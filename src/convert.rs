//! Value marshaling between the Lua stack and Python tuples.
//!
//! - [`to_engine`]: a Python result (bare value or tuple) becomes a run of
//!   Lua values. Every element produces exactly one slot; an element that
//!   cannot cross becomes `nil` and the first such failure is reported next to
//!   the values.
//! - [`to_host`]: a run of Lua values becomes a Python tuple of the same
//!   length, or a failure if any slot could not cross.
//!
//! Multiple values always travel as a tuple, so a Python function returning
//! `x` and one returning `(x,)` look identical to Lua.

use std::ffi::c_void;

use mlua::{Lua, Value};
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyCapsule, PyFloat, PyInt, PyString, PyTuple};

use crate::bridge::Bridge;
use crate::channel::relay;
use crate::error::{BridgeError, BridgeResult};
use crate::kind::{classify_host, Direction, Kind};
use crate::proxy;
use crate::value::BridgeValue;

// ==================== Python → Lua ====================

/// Lua values produced from one Python value.
#[derive(Debug)]
pub(crate) struct Pushed {
    /// One slot per element, `nil` where translation failed.
    pub(crate) values: Vec<Value>,
    /// First translation failure, if any.
    pub(crate) failure: Option<BridgeError>,
}

impl Pushed {
    pub(crate) fn count(&self) -> usize {
        self.values.len()
    }
}

/// Translate a Python value into Lua values.
///
/// A tuple contributes its elements, anything else is a single element.
pub(crate) fn to_engine(lua: &Lua, bridge: &Bridge, value: &Bound<'_, PyAny>) -> Pushed {
    let items: Vec<Bound<'_, PyAny>> = match value.downcast::<PyTuple>() {
        Ok(tuple) if classify_host(value) == Kind::Container => tuple.iter().collect(),
        _ => vec![value.clone()],
    };

    if let Err(err) = bridge.check_stack(items.len()) {
        return Pushed {
            values: Vec::new(),
            failure: Some(err),
        };
    }

    let mut values = Vec::with_capacity(items.len());
    let mut failure = None;
    for item in &items {
        match item_to_engine(lua, bridge, item) {
            Ok(value) => values.push(value),
            Err(err) => {
                log::debug!("slot {} did not cross to Lua: {err}", values.len());
                values.push(Value::Nil);
                failure.get_or_insert(err);
            }
        }
    }
    Pushed { values, failure }
}

fn item_to_engine(lua: &Lua, bridge: &Bridge, item: &Bound<'_, PyAny>) -> BridgeResult<Value> {
    match classify_host(item) {
        Kind::Nothing => Ok(Value::Nil),
        Kind::Number => number_to_engine(item),
        Kind::String => string_to_engine(lua, item),
        Kind::Function => {
            let name = proxy::display_name(item);
            proxy::export(lua, bridge, &name, item).map(Value::UserData)
        }
        Kind::Pointer => {
            let capsule = item
                .downcast::<PyCapsule>()
                .map_err(|_| BridgeError::unsupported(Kind::Pointer, Direction::ToScript))?;
            proxy::export_pointer(lua, bridge, capsule).map(Value::UserData)
        }
        kind @ (Kind::Container | Kind::Undefined) => {
            Err(BridgeError::unsupported(kind, Direction::ToScript))
        }
    }
}

fn number_to_engine(item: &Bound<'_, PyAny>) -> BridgeResult<Value> {
    if let Ok(int) = item.downcast::<PyInt>() {
        if let Ok(small) = int.extract::<i64>() {
            return Ok(Value::Integer(small));
        }
        // Too wide for a Lua integer: fall back to a float if it fits one.
        return int
            .extract::<f64>()
            .map(Value::Number)
            .map_err(|e| BridgeError::translation(Direction::ToScript, e));
    }
    if let Ok(float) = item.downcast::<PyFloat>() {
        return Ok(Value::Number(float.value()));
    }
    Err(BridgeError::UnknownNumber(type_name(item)))
}

fn string_to_engine(lua: &Lua, item: &Bound<'_, PyAny>) -> BridgeResult<Value> {
    // Lua copies the bytes; the Python buffer need not outlive the call.
    let created = if let Ok(text) = item.downcast::<PyString>() {
        let text = text
            .to_cow()
            .map_err(|e| BridgeError::translation(Direction::ToScript, e))?;
        lua.create_string(text.as_bytes())
    } else if let Ok(bytes) = item.downcast::<PyBytes>() {
        lua.create_string(bytes.as_bytes())
    } else {
        return Err(BridgeError::unsupported(Kind::String, Direction::ToScript));
    };
    created.map(Value::String).map_err(relay)
}

// ==================== Lua → Python ====================

/// Translate a run of Lua values into a Python tuple of the same length.
///
/// An empty run is a valid empty tuple.
pub(crate) fn to_host<'py>(
    py: Python<'py>,
    bridge: &Bridge,
    slots: &[Value],
) -> BridgeResult<Bound<'py, PyTuple>> {
    bridge.check_stack(slots.len())?;

    let mut items = Vec::with_capacity(slots.len());
    let mut failure = None;
    for (index, slot) in slots.iter().enumerate() {
        match slot_to_host(py, bridge, slot) {
            Ok(item) => items.push(item),
            Err(err) => {
                log::debug!("slot {index} did not cross to Python: {err}");
                items.push(py.None().into_bound(py));
                failure.get_or_insert(err);
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }
    log::trace!("built a Python tuple of {} values", items.len());
    Ok(PyTuple::new(py, items)?)
}

fn slot_to_host<'py>(
    py: Python<'py>,
    bridge: &Bridge,
    slot: &Value,
) -> BridgeResult<Bound<'py, PyAny>> {
    let item = match BridgeValue::from_script(slot)? {
        BridgeValue::Nothing => py.None().into_bound(py),
        BridgeValue::Number(number) => PyFloat::new(py, number).into_any(),
        BridgeValue::Str(text) => match text.to_str() {
            Ok(utf8) => PyString::new(py, &utf8).into_any(),
            Err(_) => PyBytes::new(py, &text.as_bytes()).into_any(),
        },
        BridgeValue::Opaque(pointer) => wrap_raw_pointer(py, pointer)?,
        // Same object that was handed to Lua, not a copy.
        BridgeValue::Retained(handle) | BridgeValue::ExportedFunction { handle, .. } => {
            bridge.registry.get(py, handle)?.into_bound(py)
        }
    };
    Ok(item)
}

/// Wrap memory owned by Lua in a capsule with no destructor.
fn wrap_raw_pointer<'py>(py: Python<'py>, pointer: *mut c_void) -> BridgeResult<Bound<'py, PyAny>> {
    // SAFETY: PyCapsule_New returns a new reference, or NULL with an exception
    // set (for instance for a null pointer). Without a destructor the capsule
    // never frees `pointer`.
    unsafe {
        Bound::from_owned_ptr_or_err(py, ffi::PyCapsule_New(pointer, std::ptr::null(), None))
    }
    .map_err(|e| BridgeError::translation(Direction::ToHost, e))
}

/// Unwrap a one-element tuple; zero or several values stay a tuple.
pub(crate) fn collapse(tuple: Bound<'_, PyTuple>) -> BridgeResult<Bound<'_, PyAny>> {
    if tuple.len() == 1 {
        Ok(tuple.get_item(0)?)
    } else {
        Ok(tuple.into_any())
    }
}

// ==================== Python Error Formatting ====================

/// Convert a `PyErr` into a human-readable error string,
/// including traceback if available.
pub(crate) fn pyerr_to_string(py: Python<'_>, err: &PyErr) -> String {
    let msg = format!("{err}");
    if let Some(tb) = err.traceback(py) {
        if let Ok(formatted) = tb.format() {
            return format!("{formatted}{msg}");
        }
    }
    msg
}

pub(crate) fn type_name(value: &Bound<'_, PyAny>) -> String {
    value
        .get_type()
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}
