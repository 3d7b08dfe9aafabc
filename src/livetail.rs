/// Sequential head advancement: polls the chain on a fixed interval, commits
/// the next block past the store's head, and triggers reorg resolution when
/// the chain's parent hash no longer matches.
use crate::error::IndexerError;
use crate::metrics;
use crate::normalize::normalize_block;
use crate::reorg::{handle_reorg, is_consistent};
use crate::rpc::{ChainSource, FetchOutcome};
use crate::store::BlockStore;
use crate::websocket::Broadcaster;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct LiveTail<C: ChainSource, S: BlockStore> {
    chain: Arc<C>,
    store: Arc<S>,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
    reorg_max_depth: u64,
}

/// Outcome of a single poll, used for metrics and caller-visible progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    NotYetProduced,
    ReorgResolved,
}

impl<C: ChainSource + 'static, S: BlockStore + 'static> LiveTail<C, S> {
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        broadcaster: Arc<Broadcaster>,
        interval_ms: u64,
        reorg_max_depth: u64,
    ) -> Self {
        Self {
            chain,
            store,
            broadcaster,
            interval: Duration::from_millis(interval_ms),
            reorg_max_depth,
        }
    }

    /// Run the poll loop until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) {
        let mut ticker = interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("live-tail shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match self.step().await {
                        Ok(outcome) => {
                            metrics::increment_livetail_steps(outcome_label(outcome));
                        }
                        Err(e) => {
                            metrics::increment_livetail_steps("error");
                            warn!(error = %e, "live-tail step failed");
                        }
                    }
                }
            }
        }
    }

    /// Perform one poll-and-advance step.
    pub async fn step(&self) -> Result<StepOutcome, IndexerError> {
        let head = self.store.head_height().await?;

        if let Some(head_height) = head {
            if !is_consistent(self.chain.as_ref(), self.store.as_ref(), head_height).await? {
                if let Some(info) = handle_reorg(
                    self.chain.as_ref(),
                    self.store.as_ref(),
                    head_height,
                    self.reorg_max_depth,
                )
                .await?
                {
                    warn!(fork_height = info.fork_height, "live-tail triggered reorg resolution");
                    return Ok(StepOutcome::ReorgResolved);
                }
            }
        }

        let next_height = head.map(|h| h + 1).unwrap_or(0);
        match self.chain.get_block_by_number(next_height).await? {
            FetchOutcome::NotYetProduced => Ok(StepOutcome::NotYetProduced),
            FetchOutcome::Found(raw) => {
                let normalized = normalize_block(raw)?;
                self.store.commit_block(&normalized).await?;
                metrics::increment_blocks_inserted(1);
                metrics::set_store_head_height(next_height as i64);

                self.broadcaster.broadcast_block(&normalized.block);
                for tx in &normalized.transactions {
                    self.broadcaster.broadcast_transaction(tx);
                }

                Ok(StepOutcome::Advanced)
            }
        }
    }
}

fn outcome_label(outcome: StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Advanced => "advanced",
        StepOutcome::NotYetProduced => "not_yet_produced",
        StepOutcome::ReorgResolved => "reorg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawBlock;
    use crate::rpc::test_support::FakeChain;
    use crate::store::test_support::MemStore;
    use ethereum_types::{H160, H256, U256};

    fn raw_block(height: u64, hash_byte: u8) -> RawBlock {
        RawBlock {
            number: U256::from(height),
            hash: H256::repeat_byte(hash_byte),
            parent_hash: H256::repeat_byte(hash_byte.saturating_sub(1)),
            timestamp: U256::from(1_700_000_000 + height),
            miner: H160::repeat_byte(0xaa),
            gas_used: U256::from(21_000),
            gas_limit: U256::from(30_000_000),
            transactions: vec![],
        }
    }

    fn live_tail() -> LiveTail<FakeChain, MemStore> {
        LiveTail::new(
            Arc::new(FakeChain::new(1)),
            Arc::new(MemStore::new()),
            Arc::new(Broadcaster::new()),
            10,
            64,
        )
    }

    #[tokio::test]
    async fn advances_one_block_per_step() {
        let lt = live_tail();
        lt.chain.insert(0, raw_block(0, 0));
        lt.chain.insert(1, raw_block(1, 1));

        assert_eq!(lt.step().await.unwrap(), StepOutcome::Advanced);
        assert_eq!(lt.store.head_height().await.unwrap(), Some(0));

        assert_eq!(lt.step().await.unwrap(), StepOutcome::Advanced);
        assert_eq!(lt.store.head_height().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn reports_not_yet_produced_past_tip() {
        let lt = live_tail();
        lt.chain.insert(0, raw_block(0, 0));
        lt.step().await.unwrap();

        assert_eq!(lt.step().await.unwrap(), StepOutcome::NotYetProduced);
        assert_eq!(lt.store.head_height().await.unwrap(), Some(0));
    }
}
