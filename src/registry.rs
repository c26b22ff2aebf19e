//! Handle registry: maps integer handles to Python objects retained on
//! behalf of a Lua state.
//!
//! Handles are monotonically increasing `u64` values starting from 1.
//! Handle 0 is reserved as the null sentinel and never resolves.
//!
//! Every host object the Lua side holds (a proxied function, a capsule) lives
//! here exactly once, owned by a [`Retained`] guard stored inside the Lua
//! userdata. Lua's garbage collector drops the userdata, the guard removes the
//! entry, and the `Py<PyAny>` drop releases the Python reference. Closing the
//! session clears whatever is left.
//!
//! One registry belongs to one session; sessions never share state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use pyo3::prelude::*;

use crate::error::{BridgeError, BridgeResult};

/// Opaque reference to a retained host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Never registered.
    pub const NULL: Handle = Handle(0);

    /// Raw handle value.
    pub fn id(self) -> u64 {
        self.0
    }
}

struct HandleTable {
    objects: HashMap<Handle, Py<PyAny>>,
    next_id: u64,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }
}

/// Per-session table of retained host objects. Cloning shares the table.
#[derive(Clone)]
pub(crate) struct Registry {
    table: Rc<RefCell<HandleTable>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            table: Rc::new(RefCell::new(HandleTable::new())),
        }
    }

    /// Take ownership of one Python reference and return its guard.
    pub(crate) fn retain(&self, obj: Py<PyAny>) -> BridgeResult<Retained> {
        let mut table = self.table.borrow_mut();
        let handle = Handle(table.next_id);
        table.next_id = table
            .next_id
            .checked_add(1)
            .ok_or_else(|| BridgeError::Engine("handle counter overflow".into()))?;
        table.objects.insert(handle, obj);
        log::trace!("retained host object as handle {}", handle.id());
        Ok(Retained {
            handle,
            registry: self.clone(),
        })
    }

    /// Clone the `Py<PyAny>` for a handle; the handle stays valid.
    ///
    /// The table borrow ends before returning, so the caller may run Python
    /// code that re-enters the registry.
    pub(crate) fn get(&self, py: Python<'_>, handle: Handle) -> BridgeResult<Py<PyAny>> {
        if handle == Handle::NULL {
            return Err(BridgeError::CorruptedProxy);
        }
        let table = self.table.borrow();
        table
            .objects
            .get(&handle)
            .map(|obj| obj.clone_ref(py))
            .ok_or(BridgeError::CorruptedProxy)
    }

    /// Drop the entry for `handle`. Returns false if it was already gone.
    fn release(&self, handle: Handle) -> bool {
        // Remove first, drop after the borrow ends: a Python finalizer may
        // call back into this session.
        let removed = self.table.borrow_mut().objects.remove(&handle);
        match removed {
            Some(obj) => {
                log::trace!("released handle {}", handle.id());
                drop(obj);
                true
            }
            None => false,
        }
    }

    /// Drop every remaining entry and return how many there were.
    pub(crate) fn clear(&self) -> usize {
        let objects = std::mem::take(&mut self.table.borrow_mut().objects);
        let count = objects.len();
        drop(objects);
        count
    }

    /// Number of live handles.
    pub(crate) fn len(&self) -> usize {
        self.table.borrow().objects.len()
    }
}

/// Ownership guard for one registry entry.
///
/// Dropping the guard releases the host reference. The guard is not `Clone`,
/// so every retain is matched by exactly one release.
pub(crate) struct Retained {
    handle: Handle,
    registry: Registry,
}

impl Retained {
    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }
}

impl fmt::Debug for Retained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Retained").field(&self.handle.0).finish()
    }
}

impl Drop for Retained {
    fn drop(&mut self) {
        if !self.registry.release(self.handle) {
            log::trace!("handle {} was already released", self.handle.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_releases_the_reference_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let obj = py.eval(c"object()", None, None).unwrap();
            let before = obj.get_refcnt();

            let registry = Registry::new();
            let guard = registry.retain(obj.clone().unbind()).unwrap();
            assert_eq!(obj.get_refcnt(), before + 1);
            assert_eq!(registry.len(), 1);

            let fetched = registry.get(py, guard.handle()).unwrap();
            assert!(fetched.bind(py).is(&obj));
            drop(fetched);

            drop(guard);
            assert_eq!(registry.len(), 0);
            assert_eq!(obj.get_refcnt(), before);
        });
    }

    #[test]
    fn handles_start_at_one_and_null_never_resolves() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let registry = Registry::new();
            let guard = registry.retain(py.None()).unwrap();
            assert_eq!(guard.handle().id(), 1);
            assert!(matches!(
                registry.get(py, Handle::NULL),
                Err(BridgeError::CorruptedProxy)
            ));
        });
    }

    #[test]
    fn clear_empties_the_table_and_late_guards_are_harmless() {
        let _ = env_logger::builder().is_test(true).try_init();
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let registry = Registry::new();
            let first = registry.retain(py.None()).unwrap();
            let second = registry.retain(py.None()).unwrap();
            assert_eq!(registry.clear(), 2);
            assert!(registry.get(py, first.handle()).is_err());
            drop(first);
            drop(second);
            assert_eq!(registry.len(), 0);
        });
    }
}
