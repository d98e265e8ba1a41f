use dashmap::DashMap;
use futures::future::BoxFuture;

use super::{KvStore, storage::StorageResult};

#[derive(Debug, Default)]
/// In-memory blob store used by tests and ephemeral sessions.
pub struct MemoryKv {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn save(&self, key: &str, value: Vec<u8>) -> BoxFuture<'static, StorageResult<()>> {
        self.blobs.insert(key.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn load(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Vec<u8>>>> {
        let value = self.blobs.get(key).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn clear(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.blobs.remove(key);
        Box::pin(async { Ok(()) })
    }
}
