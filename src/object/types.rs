use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stable on-disk object number. Unique within a mount, never reassigned
/// while the object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object {}", self.0)
    }
}

/// Persisted per-object flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectFlags(pub u64);

impl ObjectFlags {
    pub const USER_IMMUTABLE: u64 = 0x0000_0010_0000_0000;
    pub const USER_APPEND_ONLY: u64 = 0x0000_0040_0000_0000;
    pub const TRACKED: u64 = 0x0010_0000_0000_0000;
    pub const COMPRESSED: u64 = 0x0020_0000_0000_0000;
    pub const SYSTEM_IMMUTABLE: u64 = 0x0040_0000_0000_0000;
    pub const SYSTEM_APPEND_ONLY: u64 = 0x0080_0000_0000_0000;

    pub const IMMUTABLE: u64 = Self::USER_IMMUTABLE | Self::SYSTEM_IMMUTABLE;
    pub const APPEND_ONLY: u64 = Self::USER_APPEND_ONLY | Self::SYSTEM_APPEND_ONLY;

    pub fn contains(self, bits: u64) -> bool {
        self.0 & bits == bits
    }

    pub fn is_immutable(self) -> bool {
        self.0 & Self::IMMUTABLE != 0
    }

    pub fn is_append_only(self) -> bool {
        self.0 & Self::APPEND_ONLY != 0
    }

    pub fn with(self, bits: u64) -> Self {
        ObjectFlags(self.0 | bits)
    }

    pub fn without(self, bits: u64) -> Self {
        ObjectFlags(self.0 & !bits)
    }
}

/// Stored timestamp: whole seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectTime {
    pub sec: u64,
    pub nsec: u64,
}

impl ObjectTime {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        ObjectTime {
            sec: now.timestamp().max(0) as u64,
            nsec: u64::from(now.timestamp_subsec_nanos()),
        }
    }

    pub fn encode(self) -> [u64; 2] {
        [self.sec, self.nsec]
    }

    pub fn decode(stored: [u64; 2]) -> Self {
        ObjectTime {
            sec: stored[0],
            nsec: stored[1],
        }
    }
}

impl From<SystemTime> for ObjectTime {
    fn from(t: SystemTime) -> Self {
        // Pre-epoch times clamp to the epoch.
        let d = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        ObjectTime {
            sec: d.as_secs(),
            nsec: u64::from(d.subsec_nanos()),
        }
    }
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl ObjectTime {
    /// Carry whole seconds out of `nsec`, saturating at the largest time.
    pub fn normalized(self) -> Self {
        match self.sec.checked_add(self.nsec / NANOS_PER_SEC) {
            Some(sec) => ObjectTime {
                sec,
                nsec: self.nsec % NANOS_PER_SEC,
            },
            None => ObjectTime {
                sec: u64::MAX,
                nsec: NANOS_PER_SEC - 1,
            },
        }
    }
}

impl From<ObjectTime> for SystemTime {
    /// Times past what the platform can represent clamp to its maximum.
    fn from(t: ObjectTime) -> Self {
        let t = t.normalized();
        let d = Duration::new(t.sec, t.nsec as u32);
        UNIX_EPOCH
            .checked_add(d)
            .or_else(|| UNIX_EPOCH.checked_add(Duration::from_secs(i64::MAX as u64)))
            .unwrap_or(UNIX_EPOCH)
    }
}

/// Cached attribute fields of a filesystem object, excluding size (which is
/// tracked atomically on the object itself).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectAttrs {
    pub uid: u64,
    pub gid: u64,
    pub generation: u64,
    pub links: u64,
    pub atime: ObjectTime,
    pub mtime: ObjectTime,
    pub document_id: u32,
    pub flags: ObjectFlags,
}

/// Snapshot returned by `getattr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectStat {
    pub object: ObjectId,
    pub attrs: ObjectAttrs,
    pub size: u64,
    pub write_generation: u64,
}

/// Attribute changes requested through `setattr`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub atime: Option<ObjectTime>,
    pub mtime: Option<ObjectTime>,
    pub flags: Option<ObjectFlags>,
    pub document_id: Option<u32>,
    /// Size change; runs as a truncate under the whole-file range lock.
    pub size: Option<u64>,
}
