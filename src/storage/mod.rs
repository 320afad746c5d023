//! Swap Persistence
//!
//! Storage trait plus the SQLite (production) and in-memory (testing)
//! implementations.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::{StorageError, StorageResult, SwapRepository};
