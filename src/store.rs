/// Atomic persistence for blocks, transactions, and logs, plus the queries
/// the backfill/live-tail/reorg components need to reason about chain state.
use crate::error::IndexerError;
use crate::model::{Block, NormalizedBlock, Transaction};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Insert a block and its transactions atomically. A conflicting block
    /// height (already present and canonical) is a no-op, not an error —
    /// this is what lets backfill and live-tail overlap safely.
    async fn commit_block(&self, block: &NormalizedBlock) -> Result<(), IndexerError>;

    /// Highest canonical (non-orphaned) block height in the store, if any.
    async fn head_height(&self) -> Result<Option<u64>, IndexerError>;

    /// The block at `height`, if present, whether or not it was later
    /// orphaned by a reorg. Callers that need canonical-only heights should
    /// filter on the returned `orphaned` flag themselves.
    async fn get_block(&self, height: u64) -> Result<Option<Block>, IndexerError>;

    /// Mark every canonical block with height >= `from_height` as orphaned.
    /// Used by the reorg resolver once a fork point has been found.
    async fn mark_orphaned(&self, from_height: u64) -> Result<u64, IndexerError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_conns: u32) -> Result<Self, IndexerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_conns)
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::StoreFailure(format!("connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), IndexerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IndexerError::StoreFailure(format!("migrate: {e}")))
    }
}

#[async_trait]
impl BlockStore for PgStore {
    async fn commit_block(&self, nb: &NormalizedBlock) -> Result<(), IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::StoreFailure(format!("begin: {e}")))?;

        let block = &nb.block;
        let inserted = sqlx::query(
            r#"
            INSERT INTO blocks (height, hash, parent_hash, timestamp, miner, gas_used, gas_limit, tx_count, orphaned)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false)
            ON CONFLICT (height) DO NOTHING
            "#,
        )
        .bind(block.height as i64)
        .bind(block.hash.as_bytes())
        .bind(block.parent_hash.as_bytes())
        .bind(block.timestamp)
        .bind(block.miner.as_bytes())
        .bind(block.gas_used as i64)
        .bind(block.gas_limit as i64)
        .bind(block.tx_count as i32)
        .execute(&mut *tx)
        .await
        .map_err(IndexerError::from)?;

        if inserted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| IndexerError::StoreFailure(format!("rollback: {e}")))?;
            return Ok(());
        }

        for txn in &nb.transactions {
            insert_transaction(&mut tx, txn).await?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::StoreFailure(format!("commit: {e}")))
    }

    async fn head_height(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MAX(height) AS h FROM blocks WHERE NOT orphaned")
            .fetch_one(&self.pool)
            .await
            .map_err(IndexerError::from)?;
        let height: Option<i64> = row.try_get("h").map_err(IndexerError::from)?;
        Ok(height.map(|h| h as u64))
    }

    async fn get_block(&self, height: u64) -> Result<Option<Block>, IndexerError> {
        let row = sqlx::query(
            "SELECT height, hash, parent_hash, timestamp, miner, gas_used, gas_limit, tx_count, orphaned
             FROM blocks WHERE height = $1",
        )
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(IndexerError::from)?;

        Ok(row.map(|r| row_to_block(&r)))
    }

    async fn mark_orphaned(&self, from_height: u64) -> Result<u64, IndexerError> {
        let result = sqlx::query("UPDATE blocks SET orphaned = true WHERE height >= $1 AND NOT orphaned")
            .bind(from_height as i64)
            .execute(&self.pool)
            .await
            .map_err(IndexerError::from)?;
        Ok(result.rows_affected())
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    txn: &Transaction,
) -> Result<(), IndexerError> {
    sqlx::query(
        r#"
        INSERT INTO transactions (hash, block_height, tx_index, from_address, to_address, value_wei, fee_wei, nonce, input)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (hash) DO NOTHING
        "#,
    )
    .bind(txn.hash.as_bytes())
    .bind(txn.block_height as i64)
    .bind(txn.tx_index as i32)
    .bind(txn.from_address.as_bytes())
    .bind(txn.to_address.map(|a| a.as_bytes().to_vec()))
    .bind(&txn.value_wei)
    .bind(&txn.fee_wei)
    .bind(txn.nonce as i64)
    .bind(&txn.input)
    .execute(&mut **tx)
    .await
    .map_err(IndexerError::from)?;
    Ok(())
}

fn row_to_block(row: &sqlx::postgres::PgRow) -> Block {
    use ethereum_types::{H160, H256};

    let hash: Vec<u8> = row.get("hash");
    let parent_hash: Vec<u8> = row.get("parent_hash");
    let miner: Vec<u8> = row.get("miner");

    Block {
        height: row.get::<i64, _>("height") as u64,
        hash: H256::from_slice(&hash),
        parent_hash: H256::from_slice(&parent_hash),
        timestamp: row.get("timestamp"),
        miner: H160::from_slice(&miner),
        gas_used: row.get::<i64, _>("gas_used") as u64,
        gas_limit: row.get::<i64, _>("gas_limit") as u64,
        tx_count: row.get::<i32, _>("tx_count") as u32,
        orphaned: row.get("orphaned"),
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory `BlockStore` used by unit tests, mirroring the conflict and
    /// orphaning semantics of `PgStore` without a live database.
    #[derive(Default)]
    pub struct MemStore {
        blocks: Mutex<BTreeMap<u64, Block>>,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl BlockStore for MemStore {
        async fn commit_block(&self, nb: &NormalizedBlock) -> Result<(), IndexerError> {
            let mut blocks = self.blocks.lock().unwrap();
            blocks.entry(nb.block.height).or_insert_with(|| nb.block.clone());
            Ok(())
        }

        async fn head_height(&self) -> Result<Option<u64>, IndexerError> {
            let blocks = self.blocks.lock().unwrap();
            Ok(blocks
                .values()
                .filter(|b| !b.orphaned)
                .map(|b| b.height)
                .max())
        }

        async fn get_block(&self, height: u64) -> Result<Option<Block>, IndexerError> {
            let blocks = self.blocks.lock().unwrap();
            Ok(blocks.get(&height).cloned())
        }

        async fn mark_orphaned(&self, from_height: u64) -> Result<u64, IndexerError> {
            let mut blocks = self.blocks.lock().unwrap();
            let mut count = 0u64;
            for (height, block) in blocks.iter_mut() {
                if *height >= from_height && !block.orphaned {
                    block.orphaned = true;
                    count += 1;
                }
            }
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MemStore;
    use super::*;
    use ethereum_types::{H160, H256};

    fn sample_block(height: u64) -> NormalizedBlock {
        NormalizedBlock {
            block: Block {
                height,
                hash: H256::repeat_byte(height as u8),
                parent_hash: H256::repeat_byte(height.saturating_sub(1) as u8),
                timestamp: 1_700_000_000 + height as i64,
                miner: H160::repeat_byte(0xaa),
                gas_used: 21_000,
                gas_limit: 30_000_000,
                tx_count: 0,
                orphaned: false,
            },
            transactions: vec![],
        }
    }

    #[tokio::test]
    async fn commit_is_idempotent_under_concurrent_duplicate_heights() {
        let store = MemStore::new();
        store.commit_block(&sample_block(1)).await.unwrap();
        store.commit_block(&sample_block(1)).await.unwrap();
        assert_eq!(store.head_height().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn head_height_ignores_orphaned_blocks() {
        let store = MemStore::new();
        store.commit_block(&sample_block(1)).await.unwrap();
        store.commit_block(&sample_block(2)).await.unwrap();
        store.mark_orphaned(2).await.unwrap();
        assert_eq!(store.head_height().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn mark_orphaned_returns_affected_count() {
        let store = MemStore::new();
        for h in 1..=5 {
            store.commit_block(&sample_block(h)).await.unwrap();
        }
        let affected = store.mark_orphaned(3).await.unwrap();
        assert_eq!(affected, 3);
        assert_eq!(store.head_height().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn get_block_still_returns_orphaned_blocks() {
        let store = MemStore::new();
        store.commit_block(&sample_block(1)).await.unwrap();
        store.mark_orphaned(1).await.unwrap();

        let block = store.get_block(1).await.unwrap().unwrap();
        assert!(block.orphaned);
        assert_eq!(store.head_height().await.unwrap(), None);
    }
}
