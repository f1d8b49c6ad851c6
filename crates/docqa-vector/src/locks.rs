//! Per-collection writer locks owned by a backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct WriterLocks {
    by_collection: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WriterLocks {
    /// Wait until no other writer holds `collection`.
    pub(crate) async fn acquire(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.by_collection.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(collection.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
