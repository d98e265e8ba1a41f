//! Persistent device identity used to address directed replies on the
//! shared broadcast stream.

use std::sync::Arc;

use uuid::Uuid;

use crate::dao::{DEVICE_ID_KEY, KvStore, storage::StorageResult};

/// Load this device's persistent identifier, generating and storing one on
/// first use. The identifier is reused across sessions so directed replies
/// (e.g. join confirmations) survive reconnects.
pub async fn load_or_create(store: &Arc<dyn KvStore>) -> StorageResult<String> {
    if let Some(bytes) = store.load(DEVICE_ID_KEY).await? {
        if let Ok(stored) = String::from_utf8(bytes) {
            let stored = stored.trim();
            if !stored.is_empty() {
                return Ok(stored.to_string());
            }
        }
    }

    let fresh = Uuid::new_v4().to_string();
    store
        .save(DEVICE_ID_KEY, fresh.clone().into_bytes())
        .await?;
    Ok(fresh)
}
