use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{CowfsError, Result};
use crate::object::mount::Mount;
use crate::object::range_lock::{RangeGuard, RangeLockManager};
use crate::object::store::AttrHandle;
use crate::object::types::{ObjectAttrs, ObjectFlags, ObjectId, ObjectTime};

/// In-memory state for one on-disk object.
///
/// Size is kept outside the attribute lock because it follows the range-lock
/// rules instead:
///
/// 1. Truncation takes `[0, WHOLE_FILE)` exclusive before reading or setting
///    size ([`FsObject::set_size`]).
/// 2. Writes and hole punches take their own span exclusive. Writers that end
///    past EOF raise size with [`FsObject::advance_size`], which never lowers
///    it.
/// 3. Reads take their span shared and clamp against [`FsObject::size`] once
///    the lock is held.
pub struct FsObject {
    id: ObjectId,
    mount: Weak<Mount>,
    attrs: RwLock<ObjectAttrs>,
    size: AtomicU64,
    write_generation: AtomicU64,
    /// Last link removed; the on-disk object is freed at teardown.
    unlinked: AtomicBool,
    /// `None` once the object has been torn down.
    attr_handle: Mutex<Option<AttrHandle>>,
    range_locks: RangeLockManager,
}

impl FsObject {
    pub(crate) fn new(mount: Weak<Mount>, handle: AttrHandle) -> Self {
        FsObject {
            id: handle.object,
            mount,
            attrs: RwLock::new(handle.attrs.clone()),
            size: AtomicU64::new(handle.size),
            write_generation: AtomicU64::new(0),
            unlinked: AtomicBool::new(false),
            attr_handle: Mutex::new(Some(handle)),
            range_locks: RangeLockManager::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The owning mount, if it is still alive.
    pub fn mount(&self) -> Option<Arc<Mount>> {
        self.mount.upgrade()
    }

    pub fn range_locks(&self) -> &RangeLockManager {
        &self.range_locks
    }

    pub fn is_valid(&self) -> bool {
        self.attr_handle.lock().is_some()
    }

    /// Fail unless the attribute handle is still attached.
    pub fn verify(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CowfsError::InvalidObject(self.id))
        }
    }

    pub fn attrs(&self) -> ObjectAttrs {
        self.attrs.read().clone()
    }

    pub fn flags(&self) -> ObjectFlags {
        self.attrs.read().flags
    }

    pub fn update_attrs<R>(&self, f: impl FnOnce(&mut ObjectAttrs) -> R) -> R {
        f(&mut self.attrs.write())
    }

    pub fn touch_mtime(&self) {
        self.attrs.write().mtime = ObjectTime::now();
    }

    /// Current size. Callers bounds-checking data must hold a range lock over
    /// the bytes involved; reporting paths may read it unlocked.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Raise size to at least `end`. Returns the size after the update.
    ///
    /// # Panics
    /// If `guard` is not an exclusive lock on this object.
    pub fn advance_size(&self, guard: &RangeGuard<'_>, end: u64) -> u64 {
        assert!(
            guard.belongs_to(&self.range_locks) && guard.is_exclusive(),
            "advance_size on {} without an exclusive range lock",
            self.id
        );
        let mut current = self.size.load(Ordering::Acquire);
        loop {
            if end <= current {
                return current;
            }
            match self.size.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return end,
                Err(actual) => current = actual,
            }
        }
    }

    /// Set size unconditionally (truncate or extend).
    ///
    /// # Panics
    /// If `guard` is not an exclusive whole-file lock on this object.
    pub fn set_size(&self, guard: &RangeGuard<'_>, size: u64) {
        assert!(
            guard.belongs_to(&self.range_locks) && guard.is_exclusive() && guard.is_whole_file(),
            "set_size on {} without an exclusive whole-file range lock",
            self.id
        );
        self.size.store(size, Ordering::Release);
    }

    /// Clamp a read of `len` bytes at `offset` to end of file.
    pub fn clamp_read(&self, guard: &RangeGuard<'_>, offset: u64, len: u64) -> u64 {
        debug_assert!(guard.belongs_to(&self.range_locks));
        let size = self.size();
        if offset >= size {
            0
        } else {
            len.min(size - offset)
        }
    }

    pub fn write_generation(&self) -> u64 {
        self.write_generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_write_generation(&self) -> u64 {
        self.write_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_unlinked(&self) -> bool {
        self.unlinked.load(Ordering::Acquire)
    }

    pub(crate) fn mark_unlinked(&self) {
        self.unlinked.store(true, Ordering::Release);
    }

    /// Mark the object invalid and hand back its attribute handle with the
    /// cached values folded in. Only the first call returns a handle.
    pub(crate) fn detach_attr_handle(&self) -> Option<AttrHandle> {
        let mut handle = self.attr_handle.lock().take()?;
        handle.attrs = self.attrs();
        handle.size = self.size();
        Some(handle)
    }
}

impl std::fmt::Debug for FsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObject")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("valid", &self.is_valid())
            .finish()
    }
}
