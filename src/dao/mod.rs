//! Device-local blob persistence: one opaque value per fixed key, last write
//! wins, no history and no schema versioning.

mod file;
mod memory;
pub mod storage;

pub use file::FileKv;
pub use memory::MemoryKv;

use futures::future::BoxFuture;

use self::storage::StorageResult;

/// Fixed key under which the host persists its latest snapshot.
pub const GAME_STATE_KEY: &str = "game_state";
/// Fixed key holding this device's persistent identifier.
pub const DEVICE_ID_KEY: &str = "device_id";
/// Fixed key under which a client remembers its confirmed team.
pub const TEAM_ID_KEY: &str = "team_id";

/// Abstraction over device-scoped blob persistence.
pub trait KvStore: Send + Sync {
    fn save(&self, key: &str, value: Vec<u8>) -> BoxFuture<'static, StorageResult<()>>;
    fn load(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Vec<u8>>>>;
    fn clear(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;
}
