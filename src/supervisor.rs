/// Lifecycle owner: loads configuration, wires components in dependency
/// order, runs backfill-then-live-tail, and drains on shutdown signal.
use crate::backfill::BackfillCoordinator;
use crate::config::Settings;
use crate::error::IndexerError;
use crate::livetail::LiveTail;
use crate::metrics;
use crate::rpc::{ChainSource, RpcGateway};
use crate::store::{BlockStore, PgStore};
use crate::websocket::Broadcaster;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Supervisor {
    settings: Settings,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Construct every component in dependency order (C1 → C3 → C4/C5) and
    /// run until a shutdown signal arrives, then drain within the
    /// configured bound.
    pub async fn run(&self) -> Result<(), IndexerError> {
        let cancel = CancellationToken::new();
        spawn_signal_listener(cancel.clone());

        let chain = Arc::new(RpcGateway::new(
            self.settings.rpc_url.clone(),
            self.settings.rpc_max_retries,
            self.settings.rpc_timeout_ms,
        ));
        let store = Arc::new(
            PgStore::connect(&self.settings.database_url, self.settings.db_max_conns).await?,
        );
        store.run_migrations().await?;
        let broadcaster = Arc::new(Broadcaster::new());

        self.catch_up(chain.clone(), store.clone(), &cancel).await?;

        let livetail = LiveTail::new(
            chain,
            store,
            broadcaster,
            self.settings.livetail_interval_ms,
            self.settings.reorg_max_depth,
        );

        let livetail_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            livetail.run(&livetail_cancel).await;
        });

        cancel.cancelled().await;
        self.drain_with_timeout(task).await;
        Ok(())
    }

    /// Backfill the configured `[BACKFILL_START_HEIGHT, BACKFILL_END_HEIGHT]`
    /// range (end defaulting to the chain's current tip when unset), before
    /// handing off to live-tail. The store's own head is used to skip
    /// already-committed heights, not to override the configured range.
    async fn catch_up(
        &self,
        chain: Arc<RpcGateway>,
        store: Arc<PgStore>,
        cancel: &CancellationToken,
    ) -> Result<(), IndexerError> {
        let tip = chain.block_number().await?;
        let end = self.settings.backfill_end_height.unwrap_or(tip);

        let head = store.head_height().await?;
        let from = head
            .map(|h| h + 1)
            .unwrap_or(self.settings.backfill_start_height)
            .max(self.settings.backfill_start_height);

        if from > end {
            info!(from, end, "store already covers the configured backfill range, skipping");
            return Ok(());
        }

        info!(from, end, "backfilling configured range");
        let coordinator = BackfillCoordinator::new(
            chain,
            store.clone(),
            self.settings.backfill_concurrency,
            self.settings.backfill_batch_size,
        );
        let stats = coordinator.run(from, end, cancel).await?;
        info!(
            blocks_committed = stats.blocks_committed,
            errors = stats.errors,
            "backfill complete"
        );

        if let Some(head_height) = store.head_height().await? {
            metrics::set_store_head_height(head_height as i64);
            metrics::set_chain_tip_lag((tip.saturating_sub(head_height)) as i64);
        }

        Ok(())
    }

    /// Await `task` within the configured shutdown bound. A task still
    /// running past the timeout is abandoned (its `JoinHandle` is dropped,
    /// which detaches rather than aborts it) and the process exits anyway —
    /// forced close of in-flight connections is permitted.
    async fn drain_with_timeout(&self, task: tokio::task::JoinHandle<()>) {
        let timeout = Duration::from_millis(self.settings.shutdown_timeout_ms);
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => info!("graceful shutdown complete"),
            Ok(Err(e)) => error!(error = %e, "component task panicked during shutdown"),
            Err(_) => error!("shutdown drain exceeded timeout, forcing exit"),
        }
    }
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c");
        }
        cancel.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_drive_component_construction_without_panicking() {
        let settings = Settings {
            rpc_url: "http://localhost:8545".into(),
            database_url: "postgres://localhost/test".into(),
            db_max_conns: 5,
            backfill_concurrency: 4,
            backfill_batch_size: 50,
            backfill_start_height: 0,
            backfill_end_height: None,
            livetail_interval_ms: 1000,
            reorg_max_depth: 32,
            rpc_max_retries: 3,
            rpc_timeout_ms: 5000,
            metrics_port: 9898,
            api_port: 8080,
            shutdown_timeout_ms: 1000,
        };
        let supervisor = Supervisor::new(settings);
        assert_eq!(supervisor.settings.backfill_concurrency, 4);
    }
}
