//! Named Lock Registry
//!
//! Mutating actions on a swap are serialized by a lock looked up under
//! `swapLock:<id>` or `reverseSwapLock:<id>`. Holding the lock across every
//! suspension point of a handler guarantees a transaction event and a block
//! event for the same swap never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Registry of named async locks
#[derive(Default)]
pub struct LockMap {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock registered under `key`, creating it on first use
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop a key once its swap reached a terminal state
    pub fn remove(&self, key: &str) {
        self.locks.lock().unwrap().remove(key);
    }

    pub fn swap_key(id: &str) -> String {
        format!("swapLock:{}", id)
    }

    pub fn reverse_swap_key(id: &str) -> String {
        format!("reverseSwapLock:{}", id)
    }
}
