use crate::error::{CowfsError, Result};
use serde::{Deserialize, Serialize};

/// Per-mount tunables for the object layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Number of object hold buckets. Must be a power of two.
    #[serde(default = "super::default_hold_table_size")]
    pub hold_table_size: usize,

    /// Schedule access-time updates on reads.
    #[serde(default = "super::default_atime")]
    pub atime: bool,

    #[serde(default)]
    pub read_only: bool,

    /// Upper bound on resident objects. Materializing past it fails with
    /// `Exhausted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_objects: Option<usize>,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            hold_table_size: super::default_hold_table_size(),
            atime: super::default_atime(),
            read_only: false,
            max_objects: None,
        }
    }
}

impl MountConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hold_table_size == 0 || !self.hold_table_size.is_power_of_two() {
            return Err(CowfsError::Config(format!(
                "hold_table_size must be a non-zero power of two, got {}",
                self.hold_table_size
            )));
        }
        if self.max_objects == Some(0) {
            return Err(CowfsError::Config(
                "max_objects must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether reads should schedule an access-time update.
    pub fn tracks_atime(&self) -> bool {
        self.atime && !self.read_only
    }
}
