//! In-Memory Repository
//!
//! Mirrors the SQLite implementation's semantics, including transition
//! checking and cross-table uniqueness, without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{ReverseSwap, Swap};

use super::traits::{check_transition, StorageError, StorageResult, SwapRepository};

#[derive(Default)]
struct Tables {
    swaps: HashMap<String, Swap>,
    reverse_swaps: HashMap<String, ReverseSwap>,
}

/// In-memory repository for tests
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(&self, tables: &Tables, id: &str, preimage_hash: &str) -> StorageResult<()> {
        if tables.swaps.contains_key(id) || tables.reverse_swaps.contains_key(id) {
            return Err(StorageError::Duplicate(format!("id {}", id)));
        }
        let hash_in_use = tables
            .swaps
            .values()
            .any(|s| s.preimage_hash == preimage_hash)
            || tables
                .reverse_swaps
                .values()
                .any(|s| s.preimage_hash == preimage_hash);
        if hash_in_use {
            return Err(StorageError::Duplicate(format!(
                "preimage hash {}",
                preimage_hash
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SwapRepository for MemoryRepository {
    async fn insert_swap(&self, swap: &Swap) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        self.check_unique(&tables, &swap.id, &swap.preimage_hash)?;
        tables.swaps.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn update_swap(&self, swap: &Swap) -> StorageResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let persisted = tables
            .swaps
            .get(&swap.id)
            .ok_or_else(|| StorageError::NotFound(swap.id.clone()))?;
        let advanced = check_transition(&swap.id, persisted.status, swap.status, false)?;
        tables.swaps.insert(swap.id.clone(), swap.clone());
        Ok(advanced)
    }

    async fn get_swap(&self, id: &str) -> StorageResult<Option<Swap>> {
        Ok(self.tables.lock().unwrap().swaps.get(id).cloned())
    }

    async fn get_swap_by_invoice(&self, invoice: &str) -> StorageResult<Option<Swap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .swaps
            .values()
            .find(|s| s.invoice == invoice)
            .cloned())
    }

    async fn get_swap_by_preimage_hash(&self, hash: &str) -> StorageResult<Option<Swap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .swaps
            .values()
            .find(|s| s.preimage_hash == hash)
            .cloned())
    }

    async fn get_swap_by_lockup_address(&self, address: &str) -> StorageResult<Option<Swap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .swaps
            .values()
            .find(|s| s.lockup_address == address)
            .cloned())
    }

    async fn get_pending_swaps(&self) -> StorageResult<Vec<Swap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .swaps
            .values()
            .filter(|s| !s.status.is_terminal(false))
            .cloned()
            .collect())
    }

    async fn insert_reverse_swap(&self, swap: &ReverseSwap) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        self.check_unique(&tables, &swap.id, &swap.preimage_hash)?;
        tables.reverse_swaps.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn update_reverse_swap(&self, swap: &ReverseSwap) -> StorageResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let persisted = tables
            .reverse_swaps
            .get(&swap.id)
            .ok_or_else(|| StorageError::NotFound(swap.id.clone()))?;
        let advanced = check_transition(&swap.id, persisted.status, swap.status, true)?;
        tables.reverse_swaps.insert(swap.id.clone(), swap.clone());
        Ok(advanced)
    }

    async fn get_reverse_swap(&self, id: &str) -> StorageResult<Option<ReverseSwap>> {
        Ok(self.tables.lock().unwrap().reverse_swaps.get(id).cloned())
    }

    async fn get_reverse_swap_by_preimage_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .reverse_swaps
            .values()
            .find(|s| s.preimage_hash == hash)
            .cloned())
    }

    async fn get_reverse_swap_by_lockup_transaction_id(
        &self,
        txid: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .reverse_swaps
            .values()
            .find(|s| {
                s.lockup_transaction
                    .as_ref()
                    .is_some_and(|info| info.id == txid)
            })
            .cloned())
    }

    async fn get_pending_reverse_swaps(&self) -> StorageResult<Vec<ReverseSwap>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .reverse_swaps
            .values()
            .filter(|s| !s.status.is_terminal(true))
            .cloned()
            .collect())
    }
}
