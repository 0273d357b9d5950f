use std::path::PathBuf;
use std::sync::Arc;

use cowfs::object::ObjectAttrs;
use cowfs::{MemStore, Mount, MountConfig, ObjectId};

/// Get the path to the stress binary for testing.
#[allow(dead_code)]
pub fn get_stress_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("cowfs-stress").to_path_buf()
}

/// A mount over an in-memory store. `store` is kept for inspecting attach
/// counts and persisted state.
#[allow(dead_code)]
pub struct TestMount {
    pub mount: Arc<Mount>,
    pub store: Arc<MemStore>,
}

#[allow(dead_code)]
impl TestMount {
    pub fn new() -> Self {
        Self::with_config(MountConfig::default())
    }

    pub fn with_config(config: MountConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_atime_channel(
        config: MountConfig,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<ObjectId>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self::build(config, Some(tx)), rx)
    }

    fn build(
        config: MountConfig,
        atime_tx: Option<tokio::sync::mpsc::UnboundedSender<ObjectId>>,
    ) -> Self {
        let store = Arc::new(MemStore::new());
        let mount = Mount::new(config, store.clone(), atime_tx).unwrap();
        TestMount { mount, store }
    }

    /// Seed an on-disk object with one link and the given contents.
    pub fn seed(&self, object: u64, data: &[u8]) -> ObjectId {
        let attrs = ObjectAttrs {
            links: 1,
            ..ObjectAttrs::default()
        };
        self.store.insert(ObjectId(object), attrs, data.to_vec());
        ObjectId(object)
    }
}

impl Default for TestMount {
    fn default() -> Self {
        Self::new()
    }
}
