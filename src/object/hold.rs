use fxhash::hash64;
use parking_lot::{Mutex, MutexGuard};

use crate::object::types::ObjectId;

/// Fixed array of bucket mutexes serializing materialization and destruction
/// per object number.
///
/// Distinct objects may share a bucket. That only adds contention: whoever
/// holds the bucket re-checks the identity map, which is authoritative.
pub struct HoldTable {
    buckets: Box<[Mutex<()>]>,
    mask: u64,
}

/// A held bucket for one object number. Dropping it is the hold exit.
#[must_use = "dropping the hold releases the bucket immediately"]
pub struct ObjectHold<'a> {
    object: ObjectId,
    _guard: MutexGuard<'a, ()>,
}

impl ObjectHold<'_> {
    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn exit(self) {}
}

impl HoldTable {
    /// `size` must be a non-zero power of two (checked by `MountConfig::validate`).
    pub fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two(),
            "hold table size {} is not a power of two",
            size
        );
        let buckets = (0..size).map(|_| Mutex::new(())).collect::<Vec<_>>();
        HoldTable {
            buckets: buckets.into_boxed_slice(),
            mask: (size - 1) as u64,
        }
    }

    pub fn bucket_of(&self, object: ObjectId) -> usize {
        (hash64(&object.0) & self.mask) as usize
    }

    pub fn enter(&self, object: ObjectId) -> ObjectHold<'_> {
        let bucket = &self.buckets[self.bucket_of(object)];
        let guard = match bucket.try_lock() {
            Some(g) => g,
            None => {
                tracing::trace!("hold bucket for {} contended", object);
                bucket.lock()
            }
        };
        ObjectHold {
            object,
            _guard: guard,
        }
    }

    pub fn try_enter(&self, object: ObjectId) -> Option<ObjectHold<'_>> {
        self.buckets[self.bucket_of(object)]
            .try_lock()
            .map(|guard| ObjectHold {
                object,
                _guard: guard,
            })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
