use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

use crate::object::hold::ObjectHold;
use crate::object::types::ObjectId;

/// OS-facing file handle paired with exactly one live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExternalHandle(pub u64);

impl fmt::Display for ExternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle {}", self.0)
    }
}

/// Two-way object/handle mapping.
///
/// Both directions are changed only while the object's hold bucket is held,
/// which the `ObjectHold` argument proves.
#[derive(Debug, Default)]
pub struct HandleBridge {
    by_object: DashMap<ObjectId, ExternalHandle>,
    by_handle: DashMap<ExternalHandle, ObjectId>,
}

impl HandleBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `handle` with the held object.
    ///
    /// # Panics
    /// If either side is already paired. That is a caller bug, not a
    /// recoverable condition.
    pub fn attach(&self, hold: &ObjectHold<'_>, handle: ExternalHandle) {
        let object = hold.object();
        match self.by_handle.entry(handle) {
            Entry::Occupied(e) => panic!(
                "{} is already attached to {}, cannot attach to {}",
                handle,
                e.get(),
                object
            ),
            Entry::Vacant(e) => {
                e.insert(object);
            }
        }
        match self.by_object.entry(object) {
            Entry::Occupied(e) => panic!(
                "{} is already attached to {}, cannot attach {}",
                object,
                e.get(),
                handle
            ),
            Entry::Vacant(e) => {
                e.insert(handle);
            }
        }
    }

    pub fn resolve_from_handle(&self, handle: ExternalHandle) -> Option<ObjectId> {
        self.by_handle.get(&handle).map(|e| *e.value())
    }

    pub fn resolve_from_object(&self, object: ObjectId) -> Option<ExternalHandle> {
        self.by_object.get(&object).map(|e| *e.value())
    }

    /// Unpair the held object. Returns the handle it was paired with.
    pub fn detach(&self, hold: &ObjectHold<'_>) -> Option<ExternalHandle> {
        let (_, handle) = self.by_object.remove(&hold.object())?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.by_object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }
}
