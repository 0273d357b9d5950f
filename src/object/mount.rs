use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::config::MountConfig;
use crate::error::{CowfsError, Result};
use crate::object::bridge::{ExternalHandle, HandleBridge};
use crate::object::fs_object::FsObject;
use crate::object::hold::{HoldTable, ObjectHold};
use crate::object::range_lock::{RangeMode, WHOLE_FILE};
use crate::object::store::ObjectStore;
use crate::object::teardown::{TeardownGuard, TeardownLock, UnmountGuard};
use crate::object::types::{ObjectAttrs, ObjectId};

/// Result of a handle release notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The object was torn down and removed from the identity map.
    Destroyed,
    /// The handle was not paired with any resident object.
    Unknown,
    /// The hold bucket was busy; the caller should retry later.
    Deferred,
}

/// One mounted filesystem instance: the teardown gate, the hold table, the
/// identity map, and the handle bridge.
///
/// Lock order is teardown gate, then hold bucket, then range lock. Nothing in
/// this crate takes them in any other order. Destruction takes the object's
/// whole range exclusively under its hold, so a thread holding a range lock
/// must not release or unmount.
pub struct Mount {
    config: MountConfig,
    teardown: TeardownLock,
    holds: HoldTable,
    objects: DashMap<ObjectId, Arc<FsObject>>,
    /// Resident objects plus materializations in progress. Checked against
    /// `max_objects` across all buckets.
    reserved: AtomicUsize,
    bridge: HandleBridge,
    pub(crate) store: Arc<dyn ObjectStore>,
    /// Channel to the timestamp subsystem. Unbounded because scheduling an
    /// access-time update must never block a read.
    atime_tx: Option<tokio::sync::mpsc::UnboundedSender<ObjectId>>,
    next_handle: AtomicU64,
    this: Weak<Mount>,
}

impl Mount {
    pub fn new(
        config: MountConfig,
        store: Arc<dyn ObjectStore>,
        atime_tx: Option<tokio::sync::mpsc::UnboundedSender<ObjectId>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        tracing::info!(
            "Mounting object layer ({} hold buckets, atime={}, read_only={})",
            config.hold_table_size,
            config.atime,
            config.read_only
        );

        Ok(Arc::new_cyclic(|this| Mount {
            holds: HoldTable::new(config.hold_table_size),
            config,
            teardown: TeardownLock::new(),
            objects: DashMap::new(),
            reserved: AtomicUsize::new(0),
            bridge: HandleBridge::new(),
            store,
            atime_tx,
            next_handle: AtomicU64::new(1),
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Enter the mount for one operation. Fails fast once unmount has begun.
    pub fn enter(&self) -> Result<Op<'_>> {
        let teardown = self.teardown.enter()?;
        Ok(Op {
            mount: self,
            _teardown: teardown,
        })
    }

    pub fn is_live(&self) -> bool {
        self.teardown.is_live()
    }

    pub fn hold_table(&self) -> &HoldTable {
        &self.holds
    }

    /// Resident object for `object`, without materializing it.
    pub fn lookup(&self, object: ObjectId) -> Option<Arc<FsObject>> {
        self.objects.get(&object).map(|e| Arc::clone(e.value()))
    }

    pub fn resident_count(&self) -> usize {
        self.objects.len()
    }

    pub fn resolve_from_handle(&self, handle: ExternalHandle) -> Option<Arc<FsObject>> {
        let object = self.bridge.resolve_from_handle(handle)?;
        self.lookup(object)
    }

    pub fn resolve_from_object(&self, object: ObjectId) -> Option<ExternalHandle> {
        self.bridge.resolve_from_object(object)
    }

    /// The external layer dropped its last reference to `handle`.
    pub fn release(&self, handle: ExternalHandle) -> ReleaseOutcome {
        let Some(object) = self.bridge.resolve_from_handle(handle) else {
            return ReleaseOutcome::Unknown;
        };
        let hold = self.holds.enter(object);
        self.destroy_locked(&hold, handle)
    }

    /// Like [`Mount::release`], but never waits on the hold bucket. For
    /// reclaim paths that may already be inside another bucket.
    pub fn try_release(&self, handle: ExternalHandle) -> ReleaseOutcome {
        let Some(object) = self.bridge.resolve_from_handle(handle) else {
            return ReleaseOutcome::Unknown;
        };
        match self.holds.try_enter(object) {
            Some(hold) => self.destroy_locked(&hold, handle),
            None => {
                tracing::debug!("release of {} deferred: bucket busy", handle);
                ReleaseOutcome::Deferred
            }
        }
    }

    /// Take the teardown gate exclusively. Returns once every entered
    /// operation has exited; no `enter` succeeds afterwards.
    pub fn begin_unmount(&self) -> UnmountGuard<'_> {
        self.teardown.begin_unmount()
    }

    /// Quiesce, tear down every resident object, and return how many there were.
    pub fn unmount(&self) -> Result<usize> {
        let guard = self.begin_unmount();
        if !guard.was_live() {
            return Err(CowfsError::Unavailable);
        }

        let resident: Vec<ObjectId> = self.objects.iter().map(|e| *e.key()).collect();
        let mut evicted = 0;
        for object in resident {
            let hold = self.holds.enter(object);
            if self.evict_locked(&hold) {
                evicted += 1;
            }
        }
        drop(guard);

        tracing::info!("Unmounted object layer: {} objects torn down", evicted);
        Ok(evicted)
    }

    /// Identity-map check and, if absent, attach and insert. Caller holds the
    /// object's bucket for the whole sequence.
    fn materialize(&self, hold: &ObjectHold<'_>) -> Result<Arc<FsObject>> {
        let object = hold.object();
        if let Some(existing) = self.lookup(object) {
            return Ok(existing);
        }

        self.reserve_slot()?;
        let attr_handle = self.store.attach(object).map_err(|source| {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("Failed to attach attribute handle for {}: {}", object, source);
            CowfsError::Attach { object, source }
        })?;

        let fs_object = Arc::new(FsObject::new(self.this.clone(), attr_handle));
        self.objects.insert(object, Arc::clone(&fs_object));
        tracing::trace!("materialized {}", object);
        Ok(fs_object)
    }

    fn reserve_slot(&self) -> Result<()> {
        let Some(max) = self.config.max_objects else {
            self.reserved.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|n| CowfsError::Exhausted(format!("{} resident objects (limit {})", n, max)))
    }

    fn destroy_locked(&self, hold: &ObjectHold<'_>, handle: ExternalHandle) -> ReleaseOutcome {
        // The handle may have been released and the object reopened under a
        // new handle while we waited for the bucket.
        if self.bridge.resolve_from_object(hold.object()) != Some(handle) {
            return ReleaseOutcome::Unknown;
        }
        if self.evict_locked(hold) {
            ReleaseOutcome::Destroyed
        } else {
            ReleaseOutcome::Unknown
        }
    }

    fn evict_locked(&self, hold: &ObjectHold<'_>) -> bool {
        let object = hold.object();
        self.bridge.detach(hold);
        let Some((_, fs_object)) = self.objects.remove(&object) else {
            return false;
        };
        self.reserved.fetch_sub(1, Ordering::AcqRel);

        // Wait out operations that resolved the object before it left the
        // map. Anything that locks a range after this sees it invalid.
        let fence = fs_object
            .range_locks()
            .lock(0, WHOLE_FILE, RangeMode::Exclusive);
        if let Some(attr_handle) = fs_object.detach_attr_handle() {
            self.store.release(attr_handle);
        }
        if fs_object.is_unlinked() {
            tracing::debug!("freeing unlinked {}", object);
            self.store.free(object);
        }
        drop(fence);
        tracing::trace!("destroyed {}", object);
        true
    }

    pub(crate) fn stamp_atime(&self, object: ObjectId) {
        if !self.config.tracks_atime() {
            return;
        }
        if let Some(ref tx) = self.atime_tx {
            if let Err(e) = tx.send(object) {
                tracing::debug!("Failed to schedule atime update for {}: {}", object, e);
            }
        }
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("live", &self.is_live())
            .field("resident", &self.objects.len())
            .field("handles", &self.bridge.len())
            .finish()
    }
}

/// An operation in progress on a live mount. Holds the teardown gate in read
/// mode until dropped.
#[must_use = "dropping the operation exits the mount immediately"]
#[derive(Debug)]
pub struct Op<'a> {
    pub(crate) mount: &'a Mount,
    _teardown: TeardownGuard<'a>,
}

impl<'a> Op<'a> {
    pub fn mount(&self) -> &'a Mount {
        self.mount
    }

    /// The in-memory object for `object`, materializing it if needed.
    /// Concurrent callers for the same number all get the same instance.
    pub fn get_or_create(&self, object: ObjectId) -> Result<Arc<FsObject>> {
        let hold = self.mount.holds.enter(object);
        self.mount.materialize(&hold)
    }

    /// Materialize `object` and return its external handle, allocating one if
    /// the object has none.
    pub fn open(&self, object: ObjectId) -> Result<ExternalHandle> {
        let hold = self.mount.holds.enter(object);
        self.mount.materialize(&hold)?;
        if let Some(handle) = self.mount.bridge.resolve_from_object(object) {
            return Ok(handle);
        }
        let handle = ExternalHandle(self.mount.next_handle.fetch_add(1, Ordering::Relaxed));
        self.mount.bridge.attach(&hold, handle);
        Ok(handle)
    }

    /// Pair a handle created by the external layer with `object`.
    ///
    /// # Panics
    /// If either side is already paired.
    pub fn attach_handle(&self, object: ObjectId, handle: ExternalHandle) -> Result<Arc<FsObject>> {
        let hold = self.mount.holds.enter(object);
        let fs_object = self.mount.materialize(&hold)?;
        self.mount.bridge.attach(&hold, handle);
        Ok(fs_object)
    }

    /// Allocate a new on-disk object and open it.
    pub fn create(&self, mut attrs: ObjectAttrs) -> Result<(ObjectId, ExternalHandle)> {
        if self.mount.config.read_only {
            return Err(CowfsError::ReadOnly);
        }
        attrs.links = attrs.links.max(1);
        let object = self.mount.store.allocate(attrs)?;
        match self.open(object) {
            Ok(handle) => Ok((object, handle)),
            Err(e) => {
                tracing::debug!("freeing {} after failed open: {}", object, e);
                self.mount.store.free(object);
                Err(e)
            }
        }
    }

    /// Resolve a handle to a valid object.
    pub fn resolve(&self, handle: ExternalHandle) -> Result<Arc<FsObject>> {
        let fs_object = self
            .mount
            .resolve_from_handle(handle)
            .ok_or(CowfsError::StaleHandle(handle))?;
        fs_object.verify()?;
        Ok(fs_object)
    }

    pub fn exit(self) {}
}
