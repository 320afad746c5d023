//! SQLite Repository
//!
//! Durable storage for swap records that survives restarts. Uses connection
//! pooling via r2d2, WAL journaling, and applies every status transition in
//! a store-level transaction so status and side data land together.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;

use crate::script::OutputType;
use crate::types::{OrderSide, Pair, ReverseSwap, Swap, SwapStatus, TransactionInfo};

use super::traits::{check_transition, StorageError, StorageResult, SwapRepository};

const SWAP_TERMINAL: &str = "('transaction.claimed', 'invoice.failedToPay', 'swap.expired')";
const REVERSE_TERMINAL: &str = "('invoice.settled', 'transaction.failed', 'transaction.refunded')";

/// SQLite-backed repository with connection pooling
pub struct SqliteRepository {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteRepository {
    /// Open (and migrate) the database at the given path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL;"));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS swap (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                order_side TEXT NOT NULL,
                invoice TEXT NOT NULL,
                preimage_hash TEXT NOT NULL UNIQUE,
                redeem_script TEXT NOT NULL,
                lockup_address TEXT NOT NULL,
                output_type TEXT NOT NULL,
                key_index INTEGER NOT NULL,
                expected_amount INTEGER NOT NULL,
                accept_zero_conf INTEGER NOT NULL DEFAULT 0,
                timeout_block_height INTEGER NOT NULL,
                status TEXT NOT NULL,
                lockup_txid TEXT,
                lockup_vout INTEGER,
                lockup_hex TEXT,
                onchain_amount INTEGER,
                miner_fee INTEGER,
                percentage_fee INTEGER NOT NULL DEFAULT 0,
                creation_height INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_swap_status ON swap(status);
            CREATE INDEX IF NOT EXISTS idx_swap_invoice ON swap(invoice);
            CREATE INDEX IF NOT EXISTS idx_swap_lockup_address ON swap(lockup_address);

            CREATE TABLE IF NOT EXISTS reverse_swap (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                order_side TEXT NOT NULL,
                invoice TEXT NOT NULL,
                preimage_hash TEXT NOT NULL UNIQUE,
                preimage TEXT,
                claim_public_key TEXT NOT NULL,
                redeem_script TEXT NOT NULL,
                lockup_address TEXT NOT NULL,
                output_type TEXT NOT NULL,
                key_index INTEGER NOT NULL,
                invoice_amount INTEGER NOT NULL,
                onchain_amount INTEGER NOT NULL,
                timeout_block_height INTEGER NOT NULL,
                status TEXT NOT NULL,
                lockup_txid TEXT,
                lockup_vout INTEGER,
                lockup_hex TEXT,
                miner_fee INTEGER,
                percentage_fee INTEGER NOT NULL DEFAULT 0,
                creation_height INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reverse_status ON reverse_swap(status);
            CREATE INDEX IF NOT EXISTS idx_reverse_lockup_address ON reverse_swap(lockup_address);
            CREATE INDEX IF NOT EXISTS idx_reverse_lockup_txid ON reverse_swap(lockup_txid);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn preimage_hash_in_use(
        conn: &rusqlite::Connection,
        hash: &str,
    ) -> Result<bool, StorageError> {
        let count: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM swap WHERE preimage_hash = ?1)
                      + (SELECT COUNT(*) FROM reverse_swap WHERE preimage_hash = ?1)",
                params![hash],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn id_in_use(conn: &rusqlite::Connection, id: &str) -> Result<bool, StorageError> {
        let count: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM swap WHERE id = ?1)
                      + (SELECT COUNT(*) FROM reverse_swap WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn row_to_swap(row: &Row) -> rusqlite::Result<Swap> {
        let lockup_txid: Option<String> = row.get("lockup_txid")?;
        let lockup_transaction = match lockup_txid {
            Some(id) => Some(TransactionInfo {
                id,
                vout: row.get::<_, Option<i64>>("lockup_vout")?.unwrap_or(0) as u32,
                hex: row.get("lockup_hex")?,
            }),
            None => None,
        };

        Ok(Swap {
            id: row.get("id")?,
            pair: parse_column(row, "pair")?,
            order_side: parse_column(row, "order_side")?,
            invoice: row.get("invoice")?,
            preimage_hash: row.get("preimage_hash")?,
            redeem_script: row.get("redeem_script")?,
            lockup_address: row.get("lockup_address")?,
            output_type: parse_column(row, "output_type")?,
            key_index: row.get::<_, i64>("key_index")? as u32,
            expected_amount: row.get::<_, i64>("expected_amount")? as u64,
            accept_zero_conf: row.get::<_, i64>("accept_zero_conf")? != 0,
            timeout_block_height: row.get::<_, i64>("timeout_block_height")? as u32,
            status: parse_column(row, "status")?,
            lockup_transaction,
            onchain_amount: row.get::<_, Option<i64>>("onchain_amount")?.map(|v| v as u64),
            miner_fee: row.get::<_, Option<i64>>("miner_fee")?.map(|v| v as u64),
            percentage_fee: row.get::<_, i64>("percentage_fee")? as u64,
            creation_height: row.get::<_, i64>("creation_height")? as u32,
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
        })
    }

    fn row_to_reverse(row: &Row) -> rusqlite::Result<ReverseSwap> {
        let lockup_txid: Option<String> = row.get("lockup_txid")?;
        let lockup_transaction = match lockup_txid {
            Some(id) => Some(TransactionInfo {
                id,
                vout: row.get::<_, Option<i64>>("lockup_vout")?.unwrap_or(0) as u32,
                hex: row.get("lockup_hex")?,
            }),
            None => None,
        };

        Ok(ReverseSwap {
            id: row.get("id")?,
            pair: parse_column(row, "pair")?,
            order_side: parse_column(row, "order_side")?,
            invoice: row.get("invoice")?,
            preimage_hash: row.get("preimage_hash")?,
            preimage: row.get("preimage")?,
            claim_public_key: row.get("claim_public_key")?,
            redeem_script: row.get("redeem_script")?,
            lockup_address: row.get("lockup_address")?,
            output_type: parse_column(row, "output_type")?,
            key_index: row.get::<_, i64>("key_index")? as u32,
            invoice_amount: row.get::<_, i64>("invoice_amount")? as u64,
            onchain_amount: row.get::<_, i64>("onchain_amount")? as u64,
            timeout_block_height: row.get::<_, i64>("timeout_block_height")? as u32,
            status: parse_column(row, "status")?,
            lockup_transaction,
            miner_fee: row.get::<_, Option<i64>>("miner_fee")?.map(|v| v as u64),
            percentage_fee: row.get::<_, i64>("percentage_fee")? as u64,
            creation_height: row.get::<_, i64>("creation_height")? as u32,
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
        })
    }

    fn write_swap(conn: &rusqlite::Connection, swap: &Swap) -> Result<(), StorageError> {
        let (lockup_txid, lockup_vout, lockup_hex) = lockup_columns(&swap.lockup_transaction);
        conn.execute(
            r#"
            INSERT OR REPLACE INTO swap (
                id, pair, order_side, invoice, preimage_hash, redeem_script,
                lockup_address, output_type, key_index, expected_amount,
                accept_zero_conf, timeout_block_height, status, lockup_txid,
                lockup_vout, lockup_hex, onchain_amount, miner_fee,
                percentage_fee, creation_height, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
            )
            "#,
            params![
                swap.id,
                swap.pair.to_string(),
                swap.order_side.to_string(),
                swap.invoice,
                swap.preimage_hash,
                swap.redeem_script,
                swap.lockup_address,
                swap.output_type.to_string(),
                swap.key_index as i64,
                swap.expected_amount as i64,
                swap.accept_zero_conf as i64,
                swap.timeout_block_height as i64,
                swap.status.to_string(),
                lockup_txid,
                lockup_vout,
                lockup_hex,
                swap.onchain_amount.map(|v| v as i64),
                swap.miner_fee.map(|v| v as i64),
                swap.percentage_fee as i64,
                swap.creation_height as i64,
                swap.created_at as i64,
                swap.updated_at as i64,
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn write_reverse(conn: &rusqlite::Connection, swap: &ReverseSwap) -> Result<(), StorageError> {
        let (lockup_txid, lockup_vout, lockup_hex) = lockup_columns(&swap.lockup_transaction);
        conn.execute(
            r#"
            INSERT OR REPLACE INTO reverse_swap (
                id, pair, order_side, invoice, preimage_hash, preimage,
                claim_public_key, redeem_script, lockup_address, output_type,
                key_index, invoice_amount, onchain_amount, timeout_block_height,
                status, lockup_txid, lockup_vout, lockup_hex, miner_fee,
                percentage_fee, creation_height, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
            )
            "#,
            params![
                swap.id,
                swap.pair.to_string(),
                swap.order_side.to_string(),
                swap.invoice,
                swap.preimage_hash,
                swap.preimage,
                swap.claim_public_key,
                swap.redeem_script,
                swap.lockup_address,
                swap.output_type.to_string(),
                swap.key_index as i64,
                swap.invoice_amount as i64,
                swap.onchain_amount as i64,
                swap.timeout_block_height as i64,
                swap.status.to_string(),
                lockup_txid,
                lockup_vout,
                lockup_hex,
                swap.miner_fee.map(|v| v as i64),
                swap.percentage_fee as i64,
                swap.creation_height as i64,
                swap.created_at as i64,
                swap.updated_at as i64,
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn query_swap(
        &self,
        where_clause: &str,
        value: &str,
    ) -> StorageResult<Option<Swap>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT * FROM swap WHERE {} = ?1", where_clause),
            params![value],
            Self::row_to_swap,
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn query_reverse(
        &self,
        where_clause: &str,
        value: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT * FROM reverse_swap WHERE {} = ?1", where_clause),
            params![value],
            Self::row_to_reverse,
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }
}

fn lockup_columns(
    info: &Option<TransactionInfo>,
) -> (Option<String>, Option<i64>, Option<String>) {
    match info {
        Some(info) => (
            Some(info.id.clone()),
            Some(info.vout as i64),
            info.hex.clone(),
        ),
        None => (None, None, None),
    }
}

fn parse_column<T>(row: &Row, column: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("{}: {}", column, e).into(),
        )
    })
}

#[async_trait]
impl SwapRepository for SqliteRepository {
    async fn insert_swap(&self, swap: &Swap) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if Self::id_in_use(&tx, &swap.id)? {
            return Err(StorageError::Duplicate(format!("id {}", swap.id)));
        }
        if Self::preimage_hash_in_use(&tx, &swap.preimage_hash)? {
            return Err(StorageError::Duplicate(format!(
                "preimage hash {}",
                swap.preimage_hash
            )));
        }

        Self::write_swap(&tx, swap)?;
        tx.commit().map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn update_swap(&self, swap: &Swap) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let persisted: SwapStatus = tx
            .query_row(
                "SELECT status FROM swap WHERE id = ?1",
                params![swap.id],
                |row| parse_column(row, "status"),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(swap.id.clone()))?;

        let advanced = check_transition(&swap.id, persisted, swap.status, false)?;
        Self::write_swap(&tx, swap)?;
        tx.commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(advanced)
    }

    async fn get_swap(&self, id: &str) -> StorageResult<Option<Swap>> {
        self.query_swap("id", id)
    }

    async fn get_swap_by_invoice(&self, invoice: &str) -> StorageResult<Option<Swap>> {
        self.query_swap("invoice", invoice)
    }

    async fn get_swap_by_preimage_hash(&self, hash: &str) -> StorageResult<Option<Swap>> {
        self.query_swap("preimage_hash", hash)
    }

    async fn get_swap_by_lockup_address(&self, address: &str) -> StorageResult<Option<Swap>> {
        self.query_swap("lockup_address", address)
    }

    async fn get_pending_swaps(&self) -> StorageResult<Vec<Swap>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM swap WHERE status NOT IN {}",
                SWAP_TERMINAL
            ))
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_swap)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn insert_reverse_swap(&self, swap: &ReverseSwap) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if Self::id_in_use(&tx, &swap.id)? {
            return Err(StorageError::Duplicate(format!("id {}", swap.id)));
        }
        if Self::preimage_hash_in_use(&tx, &swap.preimage_hash)? {
            return Err(StorageError::Duplicate(format!(
                "preimage hash {}",
                swap.preimage_hash
            )));
        }

        Self::write_reverse(&tx, swap)?;
        tx.commit().map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn update_reverse_swap(&self, swap: &ReverseSwap) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let persisted: SwapStatus = tx
            .query_row(
                "SELECT status FROM reverse_swap WHERE id = ?1",
                params![swap.id],
                |row| parse_column(row, "status"),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(swap.id.clone()))?;

        let advanced = check_transition(&swap.id, persisted, swap.status, true)?;
        Self::write_reverse(&tx, swap)?;
        tx.commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(advanced)
    }

    async fn get_reverse_swap(&self, id: &str) -> StorageResult<Option<ReverseSwap>> {
        self.query_reverse("id", id)
    }

    async fn get_reverse_swap_by_preimage_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        self.query_reverse("preimage_hash", hash)
    }

    async fn get_reverse_swap_by_lockup_transaction_id(
        &self,
        txid: &str,
    ) -> StorageResult<Option<ReverseSwap>> {
        self.query_reverse("lockup_txid", txid)
    }

    async fn get_pending_reverse_swaps(&self) -> StorageResult<Vec<ReverseSwap>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM reverse_swap WHERE status NOT IN {}",
                REVERSE_TERMINAL
            ))
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_reverse)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::generate_swap_id;

    fn sample_swap(id: &str, preimage_hash: &str) -> Swap {
        Swap {
            id: id.to_string(),
            pair: Pair::new("LTC", "BTC"),
            order_side: OrderSide::Sell,
            invoice: format!("lnbcrt1_{}", id),
            preimage_hash: preimage_hash.to_string(),
            redeem_script: "51".to_string(),
            lockup_address: format!("bcrt1q{}", id),
            output_type: OutputType::Compatibility,
            key_index: 0,
            expected_amount: 101_500,
            accept_zero_conf: false,
            timeout_block_height: 1_000,
            status: SwapStatus::SwapCreated,
            lockup_transaction: None,
            onchain_amount: None,
            miner_fee: None,
            percentage_fee: 1_000,
            creation_height: 900,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn sample_reverse(id: &str, preimage_hash: &str) -> ReverseSwap {
        ReverseSwap {
            id: id.to_string(),
            pair: Pair::new("LTC", "BTC"),
            order_side: OrderSide::Buy,
            invoice: format!("lnbcrt1_{}", id),
            preimage_hash: preimage_hash.to_string(),
            preimage: None,
            claim_public_key: "02".repeat(33),
            redeem_script: "51".to_string(),
            lockup_address: format!("bcrt1q{}", id),
            output_type: OutputType::Compatibility,
            key_index: 1,
            invoice_amount: 200_000,
            onchain_amount: 198_000,
            timeout_block_height: 1_000,
            status: SwapStatus::SwapCreated,
            lockup_transaction: None,
            miner_fee: None,
            percentage_fee: 1_500,
            creation_height: 900,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_swap_roundtrip() {
        let repo = SqliteRepository::in_memory().unwrap();
        let swap = sample_swap(&generate_swap_id(), &"aa".repeat(32));

        repo.insert_swap(&swap).await.unwrap();
        let loaded = repo.get_swap(&swap.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SwapStatus::SwapCreated);
        assert_eq!(loaded.expected_amount, 101_500);
        assert_eq!(loaded.pair, swap.pair);

        let by_invoice = repo.get_swap_by_invoice(&swap.invoice).await.unwrap();
        assert!(by_invoice.is_some());
        let by_hash = repo
            .get_swap_by_preimage_hash(&swap.preimage_hash)
            .await
            .unwrap();
        assert!(by_hash.is_some());
    }

    #[tokio::test]
    async fn test_id_reuse_rejected_across_tables() {
        let repo = SqliteRepository::in_memory().unwrap();
        let id = generate_swap_id();

        repo.insert_swap(&sample_swap(&id, &"aa".repeat(32)))
            .await
            .unwrap();
        let result = repo
            .insert_reverse_swap(&sample_reverse(&id, &"bb".repeat(32)))
            .await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_one_live_swap_per_preimage_hash() {
        let repo = SqliteRepository::in_memory().unwrap();
        let hash = "cc".repeat(32);

        repo.insert_swap(&sample_swap(&generate_swap_id(), &hash))
            .await
            .unwrap();
        let result = repo
            .insert_reverse_swap(&sample_reverse(&generate_swap_id(), &hash))
            .await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_transition_validation_and_idempotence() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut swap = sample_swap(&generate_swap_id(), &"dd".repeat(32));
        repo.insert_swap(&swap).await.unwrap();

        swap.set_status(SwapStatus::TransactionMempool);
        assert!(repo.update_swap(&swap).await.unwrap());

        // Re-applying the same transition is a no-op
        assert!(!repo.update_swap(&swap).await.unwrap());

        // Skipping backward is rejected
        swap.set_status(SwapStatus::SwapCreated);
        assert!(matches!(
            repo.update_swap(&swap).await,
            Err(StorageError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_excludes_terminal() {
        let repo = SqliteRepository::in_memory().unwrap();

        let mut done = sample_swap(&generate_swap_id(), &"ee".repeat(32));
        repo.insert_swap(&done).await.unwrap();
        for status in [
            SwapStatus::TransactionMempool,
            SwapStatus::TransactionConfirmed,
            SwapStatus::InvoicePending,
            SwapStatus::InvoicePaid,
            SwapStatus::TransactionClaimed,
        ] {
            done.set_status(status);
            repo.update_swap(&done).await.unwrap();
        }

        let live = sample_swap(&generate_swap_id(), &"ff".repeat(32));
        repo.insert_swap(&live).await.unwrap();

        let pending = repo.get_pending_swaps().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, live.id);
    }

    #[tokio::test]
    async fn test_reverse_lockup_txid_lookup() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut swap = sample_reverse(&generate_swap_id(), &"ab".repeat(32));
        repo.insert_reverse_swap(&swap).await.unwrap();

        swap.set_lockup_transaction(
            TransactionInfo {
                id: "txid123".to_string(),
                vout: 0,
                hex: Some("02000000".to_string()),
            },
            350,
        );
        swap.set_status(SwapStatus::TransactionMempool);
        repo.update_reverse_swap(&swap).await.unwrap();

        let loaded = repo
            .get_reverse_swap_by_lockup_transaction_id("txid123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, swap.id);
        assert_eq!(loaded.miner_fee, Some(350));
    }
}
