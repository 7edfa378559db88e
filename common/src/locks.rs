//! Per-(data instance, version) write locks.
//!
//! PUT-style operations on a data instance and version must not
//! interleave, or concurrent writers could overwrite each other's merged
//! blocks. The registry hands out one async mutex per (instance, version)
//! pair; GET-style operations never take it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::VersionId;

pub struct WriteLockRegistry {
    locks: Mutex<HashMap<(String, VersionId), Arc<AsyncMutex<()>>>>,
}

impl WriteLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the write lock for `(instance, version)`, waiting if
    /// another writer holds it. The guard may be held across awaits.
    pub async fn acquire(&self, instance: &str, version: VersionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            locks
                .entry((instance.to_string(), version))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

impl Default for WriteLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
