//! In-memory object layer: teardown gating, per-object-number hold buckets,
//! byte-range locks, and the object/handle bridge.

pub mod bridge;
pub mod fs_object;
pub mod hold;
pub mod mount;
mod ops;
pub mod range_lock;
pub mod store;
pub mod teardown;
pub mod types;

pub use bridge::{ExternalHandle, HandleBridge};
pub use fs_object::FsObject;
pub use hold::{HoldTable, ObjectHold};
pub use mount::{Mount, Op, ReleaseOutcome};
pub use range_lock::{RangeGuard, RangeLockManager, RangeMode, WHOLE_FILE};
pub use store::{AttrHandle, MemStore, ObjectStore};
pub use teardown::{TeardownGuard, TeardownLock, UnmountGuard};
pub use types::{ObjectAttrs, ObjectFlags, ObjectId, ObjectStat, ObjectTime, SetAttr};
