pub mod config;
pub mod error;
pub mod object;

pub use config::load_config;
pub use config::save_config;
pub use config::MountConfig;

pub use error::{CowfsError, Result};

pub use object::{
    ExternalHandle, FsObject, MemStore, Mount, ObjectId, ObjectStore, Op, RangeMode,
    ReleaseOutcome, WHOLE_FILE,
};
