//! luapy: Lua ↔ Python bridge.
//!
//! This crate builds a `cdylib` loaded by Python as the `lua` module (see
//! [`module`]) and an `rlib` with the same functionality as a Rust API
//! ([`Session`]). It embeds a Lua 5.4 state through `mlua` and talks to the
//! interpreter through PyO3:
//!
//! - Type classification shared by both runtimes ([`kind`])
//! - Value marshaling in both directions (`convert`)
//! - Python callables as first-class Lua values (`proxy`)
//! - Error propagation across the boundary (`channel`, [`error`])
//! - Ownership of Python references held by Lua (`registry`)

pub mod config;
pub mod error;
pub mod kind;
pub mod module;
pub mod session;

mod bridge;
mod channel;
mod convert;
mod proxy;
mod registry;
mod value;

pub use config::SessionConfig;
pub use error::{BridgeError, BridgeResult, EngineError, LuaError, TranslationError};
pub use kind::{classify_host, classify_script, Direction, Kind};
pub use mlua::StdLib;
pub use session::Session;
