use crate::object::bridge::ExternalHandle;
use crate::object::types::ObjectId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CowfsError>;

#[derive(Error, Debug)]
pub enum CowfsError {
    /// The mount's liveness flag is cleared; unmount has begun or finished.
    #[error("Filesystem unavailable: unmount in progress")]
    Unavailable,

    /// The object's attribute handle is not attached (failed or torn down).
    #[error("Invalid object state: {0}")]
    InvalidObject(ObjectId),

    #[error("Resource exhausted: {0}")]
    Exhausted(String),

    #[error("Failed to attach attribute handle for {object}: {source}")]
    Attach {
        object: ObjectId,
        #[source]
        source: std::io::Error,
    },

    /// The handle is not paired with a live object.
    #[error("Stale {0}")]
    StaleHandle(ExternalHandle),

    #[error("Operation not permitted on {0}")]
    PermissionDenied(ObjectId),

    #[error("Filesystem is mounted read-only")]
    ReadOnly,

    #[error("Invalid range: offset {offset}, length {len}")]
    InvalidRange { offset: u64, len: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

impl CowfsError {
    /// Map to the errno presented at the filesystem boundary.
    ///
    /// Core failures, exhaustion included, surface as a generic I/O error;
    /// callers that want to retry check [`CowfsError::is_retryable`]. Flag
    /// refusals, read-only mounts and bad ranges keep their own codes.
    pub fn to_errno(&self) -> i32 {
        match self {
            CowfsError::PermissionDenied(_) => libc::EPERM,
            CowfsError::ReadOnly => libc::EROFS,
            CowfsError::InvalidRange { .. } => libc::EINVAL,
            _ => libc::EIO,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CowfsError::Exhausted(_))
    }
}

impl From<std::io::Error> for CowfsError {
    fn from(err: std::io::Error) -> Self {
        CowfsError::Io(err)
    }
}

impl From<serde_json::Error> for CowfsError {
    fn from(err: serde_json::Error) -> Self {
        CowfsError::Json(err.to_string())
    }
}
