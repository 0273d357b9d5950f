use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CowfsError, Result};

/// Mount-wide reader-writer gate.
///
/// Every operation holds it in read mode for its whole duration; unmount takes
/// it exclusively, which drains every in-flight operation before the liveness
/// flag is cleared. `parking_lot`'s lock is writer-preferring, so a pending
/// unmount is not starved by a steady stream of new operations. As a
/// consequence `enter` is not reentrant: a thread that already holds a
/// [`TeardownGuard`] must pass it along rather than entering again.
#[derive(Debug)]
pub struct TeardownLock {
    lock: RwLock<()>,
    live: AtomicBool,
}

/// Proof that the holder entered a live mount. Dropping it is the matching exit.
#[must_use = "dropping the guard exits the mount immediately"]
#[derive(Debug)]
pub struct TeardownGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

impl TeardownGuard<'_> {
    pub fn exit(self) {}
}

/// Exclusive hold taken by unmount. Housekeeping runs while it is alive.
#[must_use = "dropping the guard ends unmount housekeeping"]
#[derive(Debug)]
pub struct UnmountGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
    was_live: bool,
}

impl UnmountGuard<'_> {
    /// False if an earlier unmount already cleared liveness.
    pub fn was_live(&self) -> bool {
        self.was_live
    }
}

impl TeardownLock {
    pub fn new() -> Self {
        TeardownLock {
            lock: RwLock::new(()),
            live: AtomicBool::new(true),
        }
    }

    pub fn enter(&self) -> Result<TeardownGuard<'_>> {
        let guard = self.lock.read();
        if !self.live.load(Ordering::Acquire) {
            drop(guard);
            return Err(CowfsError::Unavailable);
        }
        Ok(TeardownGuard { _guard: guard })
    }

    /// Block until every entered operation has exited, then clear liveness.
    pub fn begin_unmount(&self) -> UnmountGuard<'_> {
        let guard = match self.lock.try_write() {
            Some(g) => g,
            None => {
                tracing::debug!("unmount waiting for in-flight operations to drain");
                self.lock.write()
            }
        };
        let was_live = self.live.swap(false, Ordering::AcqRel);
        UnmountGuard {
            _guard: guard,
            was_live,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl Default for TeardownLock {
    fn default() -> Self {
        Self::new()
    }
}
