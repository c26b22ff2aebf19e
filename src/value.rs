//! The closed set of Lua values the bridge knows how to hand to Python.
//!
//! Reading a Lua value into a [`BridgeValue`] is the only place where proxy
//! userdata is told apart from other userdata; everything downstream pattern
//! matches on the variant.

use std::ffi::c_void;

use mlua::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::kind::{classify_script, Direction};
use crate::proxy::{HostPointer, PyFunction};
use crate::registry::Handle;

#[derive(Debug)]
pub(crate) enum BridgeValue {
    Nothing,
    /// Lua integers widen to floats at this boundary.
    Number(f64),
    Str(mlua::String),
    /// Memory owned by the Lua side; Python gets it without a destructor.
    Opaque(*mut c_void),
    /// A capsule previously handed to Lua.
    Retained(Handle),
    /// A Python callable previously handed to Lua.
    ExportedFunction { name: String, handle: Handle },
}

impl BridgeValue {
    pub(crate) fn from_script(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Nil => Ok(BridgeValue::Nothing),
            Value::Integer(int) => Ok(BridgeValue::Number(*int as f64)),
            Value::Number(number) => Ok(BridgeValue::Number(*number)),
            Value::String(text) => Ok(BridgeValue::Str(text.clone())),
            Value::LightUserData(light) => Ok(BridgeValue::Opaque(light.0)),
            Value::UserData(ud) => match ud.borrow::<PyFunction>() {
                Ok(function) => Ok(BridgeValue::ExportedFunction {
                    name: function.name().to_owned(),
                    handle: function.handle(),
                }),
                Err(mlua::Error::UserDataDestructed) => Err(BridgeError::CorruptedProxy),
                Err(_) => match ud.borrow::<HostPointer>() {
                    Ok(pointer) => Ok(BridgeValue::Retained(pointer.handle())),
                    Err(_) => Ok(BridgeValue::Opaque(ud.to_pointer() as *mut c_void)),
                },
            },
            other => Err(BridgeError::unsupported(
                classify_script(other),
                Direction::ToHost,
            )),
        }
    }
}
