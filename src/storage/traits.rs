//! Storage Trait Definitions
//!
//! One repository serves both swap tables. Writes are transactional: a status
//! transition lands together with its side data or not at all. Applying the
//! same transition twice is a no-op, and illegal transitions are rejected so
//! persisted state can only walk the lifecycle DAG forward.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ReverseSwap, Swap, SwapStatus};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("illegal transition {from} -> {to} for swap {id}")]
    IllegalTransition {
        id: String,
        from: SwapStatus,
        to: SwapStatus,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent store for swap entities
///
/// Implementations:
/// - `SqliteRepository` - production storage with SQLite
/// - `MemoryRepository` - in-memory storage for testing
#[async_trait]
pub trait SwapRepository: Send + Sync {
    /// Insert a new submarine swap; rejects id or preimage-hash reuse across
    /// both tables
    async fn insert_swap(&self, swap: &Swap) -> StorageResult<()>;

    /// Persist a submarine swap transition. Returns `false` when the stored
    /// status already equals the record's (idempotent no-op).
    async fn update_swap(&self, swap: &Swap) -> StorageResult<bool>;

    async fn get_swap(&self, id: &str) -> StorageResult<Option<Swap>>;
    async fn get_swap_by_invoice(&self, invoice: &str) -> StorageResult<Option<Swap>>;
    async fn get_swap_by_preimage_hash(&self, hash: &str) -> StorageResult<Option<Swap>>;
    async fn get_swap_by_lockup_address(&self, address: &str) -> StorageResult<Option<Swap>>;

    /// All submarine swaps not in a terminal status
    async fn get_pending_swaps(&self) -> StorageResult<Vec<Swap>>;

    /// Insert a new reverse swap; same uniqueness rules as `insert_swap`
    async fn insert_reverse_swap(&self, swap: &ReverseSwap) -> StorageResult<()>;

    /// Persist a reverse swap transition; idempotence as `update_swap`
    async fn update_reverse_swap(&self, swap: &ReverseSwap) -> StorageResult<bool>;

    async fn get_reverse_swap(&self, id: &str) -> StorageResult<Option<ReverseSwap>>;
    async fn get_reverse_swap_by_preimage_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<ReverseSwap>>;
    async fn get_reverse_swap_by_lockup_transaction_id(
        &self,
        txid: &str,
    ) -> StorageResult<Option<ReverseSwap>>;

    /// All reverse swaps not in a terminal status
    async fn get_pending_reverse_swaps(&self) -> StorageResult<Vec<ReverseSwap>>;
}

/// Validate a transition from the persisted status to the record's status.
///
/// Returns `Ok(false)` for a same-status write, `Ok(true)` for a legal step,
/// and `IllegalTransition` otherwise.
pub(crate) fn check_transition(
    id: &str,
    persisted: SwapStatus,
    next: SwapStatus,
    is_reverse: bool,
) -> StorageResult<bool> {
    if persisted == next {
        return Ok(false);
    }
    if !persisted.can_transition_to(next, is_reverse) {
        return Err(StorageError::IllegalTransition {
            id: id.to_string(),
            from: persisted,
            to: next,
        });
    }
    Ok(true)
}
