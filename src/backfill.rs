/// Bounded parallel range fill: pulls a contiguous height range from the
/// chain and commits it to the store with at most `concurrency` requests in
/// flight at once.
///
/// Uses a `Semaphore`-bounded worker pool: each height in a batch is an
/// async task that acquires a permit, fetches, normalizes, and commits, and
/// all tasks in the batch are awaited together via `join_all`.
use crate::error::IndexerError;
use crate::metrics;
use crate::normalize::normalize_block;
use crate::rpc::{ChainSource, FetchOutcome};
use crate::store::BlockStore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub blocks_committed: u64,
    pub errors: u64,
}

pub struct BackfillCoordinator<C: ChainSource, S: BlockStore> {
    chain: Arc<C>,
    store: Arc<S>,
    concurrency: usize,
    batch_size: u64,
}

impl<C: ChainSource + 'static, S: BlockStore + 'static> BackfillCoordinator<C, S> {
    pub fn new(chain: Arc<C>, store: Arc<S>, concurrency: usize, batch_size: u64) -> Self {
        Self {
            chain,
            store,
            concurrency,
            batch_size,
        }
    }

    /// Fill every height in `[from_height, to_height]` (inclusive), bounded
    /// by the configured concurrency, cooperating with `cancel` for
    /// graceful shutdown between batches.
    pub async fn run(
        &self,
        from_height: u64,
        to_height: u64,
        cancel: &CancellationToken,
    ) -> Result<Stats, IndexerError> {
        let mut stats = Stats::default();
        let mut height = from_height;

        while height <= to_height {
            if cancel.is_cancelled() {
                info!(height, "backfill cancelled before next batch");
                return Err(IndexerError::Cancelled);
            }

            let batch_end = (height + self.batch_size - 1).min(to_height);
            let batch_stats = self.run_batch(height, batch_end).await;
            stats.blocks_committed += batch_stats.blocks_committed;
            stats.errors += batch_stats.errors;
            metrics::increment_batches_processed();

            height = batch_end + 1;
        }

        Ok(stats)
    }

    async fn run_batch(&self, from: u64, to: u64) -> Stats {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let heights: Vec<u64> = (from..=to).collect();

        let tasks: Vec<_> = heights
            .into_iter()
            .map(|h| {
                let semaphore = semaphore.clone();
                let chain = self.chain.clone();
                let store = self.store.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    fetch_and_commit(chain.as_ref(), store.as_ref(), h).await
                }
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let mut stats = Stats::default();
        for result in results {
            match result {
                Ok(true) => stats.blocks_committed += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    let kind = if e.retry_class().is_some() { "rpc" } else { "store" };
                    metrics::increment_backfill_errors(kind);
                    warn!(error = %e, "backfill: height failed, continuing");
                }
            }
        }
        stats
    }
}

async fn fetch_and_commit<C: ChainSource, S: BlockStore>(
    chain: &C,
    store: &S,
    height: u64,
) -> Result<bool, IndexerError> {
    match chain.get_block_by_number(height).await? {
        FetchOutcome::NotYetProduced => Ok(false),
        FetchOutcome::Found(raw) => {
            let normalized = normalize_block(raw)?;
            store.commit_block(&normalized).await?;
            metrics::increment_blocks_inserted(1);
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawBlock;
    use crate::rpc::test_support::FakeChain;
    use crate::store::test_support::MemStore;
    use ethereum_types::{H160, H256, U256};

    fn raw_block(height: u64) -> RawBlock {
        RawBlock {
            number: U256::from(height),
            hash: H256::repeat_byte(height as u8),
            parent_hash: H256::repeat_byte(height.saturating_sub(1) as u8),
            timestamp: U256::from(1_700_000_000 + height),
            miner: H160::repeat_byte(0xaa),
            gas_used: U256::from(21_000),
            gas_limit: U256::from(30_000_000),
            transactions: vec![],
        }
    }

    #[tokio::test]
    async fn fills_contiguous_range() {
        let chain = Arc::new(FakeChain::new(1));
        for h in 1..=10 {
            chain.insert(h, raw_block(h));
        }
        let store = Arc::new(MemStore::new());
        let coordinator = BackfillCoordinator::new(chain, store.clone(), 4, 3);

        let stats = coordinator
            .run(1, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.blocks_committed, 10);
        assert_eq!(stats.errors, 0);
        assert_eq!(store.head_height().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn stops_immediately_when_cancelled() {
        let chain = Arc::new(FakeChain::new(1));
        let store = Arc::new(MemStore::new());
        let coordinator = BackfillCoordinator::new(chain, store, 2, 5);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = coordinator.run(1, 10, &cancel).await;
        assert!(matches!(result, Err(IndexerError::Cancelled)));
    }

    #[tokio::test]
    async fn gaps_past_tip_are_not_errors() {
        let chain = Arc::new(FakeChain::new(1));
        chain.insert(1, raw_block(1));
        // heights 2..=5 are never inserted: NotYetProduced, not an error.
        let store = Arc::new(MemStore::new());
        let coordinator = BackfillCoordinator::new(chain, store.clone(), 2, 5);

        let stats = coordinator.run(1, 5, &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.blocks_committed, 1);
        assert_eq!(stats.errors, 0);
    }
}
