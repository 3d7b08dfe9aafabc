/// Chain reorganization handling.
///
/// When a live-tail step observes that the chain's reported parent hash no
/// longer matches the store's head, the canonical chain has forked. This
/// module walks backward to find the last common block, orphans everything
/// above it, and hands control back to the live-tail loop to re-fill from
/// the fork point forward.
use crate::error::IndexerError;
use crate::metrics;
use crate::rpc::{ChainSource, FetchOutcome};
use crate::store::BlockStore;
use tracing::{info, warn};

/// Describes a resolved reorg: where the chains diverged and how many
/// blocks were orphaned as a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgInfo {
    pub fork_height: u64,
    pub orphaned_blocks: u64,
}

/// Walk backward from `current_height`, comparing the store's recorded hash
/// at each height against the chain's, until a match is found. Returns the
/// height of the last common block.
///
/// Bounded by `max_depth`: if no match is found within `max_depth` blocks of
/// `current_height`, the reorg is too deep to resolve automatically.
pub async fn find_fork_point<C: ChainSource, S: BlockStore>(
    chain: &C,
    store: &S,
    current_height: u64,
    max_depth: u64,
) -> Result<u64, IndexerError> {
    let floor = current_height.saturating_sub(max_depth);
    let mut height = current_height;

    loop {
        let stored = store.get_block(height).await?;
        let remote = chain.get_block_by_number(height).await?;

        match (stored, remote) {
            (Some(stored_block), FetchOutcome::Found(remote_block)) if stored_block.hash == remote_block.hash => {
                return Ok(height);
            }
            _ => {}
        }

        if height == floor {
            let depth = current_height - floor;
            return Err(IndexerError::ReorgTooDeep {
                depth,
                max: max_depth,
            });
        }
        height -= 1;
    }
}

/// Resolve a reorg detected at `current_height`: find the fork point, then
/// orphan every canonical block from the block after it onward.
///
/// Returns `None` if the chains still match at `current_height` (no reorg
/// after all — the caller raced with a concurrent commit).
pub async fn handle_reorg<C: ChainSource, S: BlockStore>(
    chain: &C,
    store: &S,
    current_height: u64,
    max_depth: u64,
) -> Result<Option<ReorgInfo>, IndexerError> {
    let fork_height = find_fork_point(chain, store, current_height, max_depth).await?;

    if fork_height == current_height {
        return Ok(None);
    }

    let rollback_from = fork_height + 1;
    let orphaned_blocks = store.mark_orphaned(rollback_from).await?;

    metrics::increment_reorg_detected();
    metrics::set_reorg_depth((current_height - fork_height) as i64);
    metrics::increment_orphaned_blocks(orphaned_blocks);

    warn!(
        fork_height,
        rollback_from,
        orphaned_blocks,
        "reorg resolved: chain diverged, orphaning suffix"
    );

    Ok(Some(ReorgInfo {
        fork_height,
        orphaned_blocks,
    }))
}

/// Quick check used by the live-tail loop: does the store's current head
/// still descend from the chain's canonical block at that height?
pub async fn is_consistent<C: ChainSource, S: BlockStore>(
    chain: &C,
    store: &S,
    height: u64,
) -> Result<bool, IndexerError> {
    let stored = store.get_block(height).await?;
    let remote = chain.get_block_by_number(height).await?;

    match (stored, remote) {
        (Some(stored_block), FetchOutcome::Found(remote_block)) => {
            Ok(stored_block.hash == remote_block.hash)
        }
        (None, _) => Ok(true),
        _ => {
            info!(height, "chain does not yet have a block at this height");
            Ok(true)
        }
    }
}
