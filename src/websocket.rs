/// Inbound broadcast interface: fans out block and transaction summaries to
/// WebSocket subscribers as the live-tail advances the chain.
///
/// Sends are non-blocking and drop-on-full-or-no-subscribers — a lagging or
/// absent client never backs up ingestion.
use crate::model::{Block, Transaction};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    Extension,
};
use futures::{stream::StreamExt, SinkExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Summary of a committed block, as sent to `/ws/blocks` subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    pub tx_count: u32,
    pub timestamp: i64,
    pub miner: String,
    pub gas_used: u64,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            height: block.height,
            hash: format!("{:#x}", block.hash),
            tx_count: block.tx_count,
            timestamp: block.timestamp,
            miner: format!("{:#x}", block.miner),
            gas_used: block.gas_used,
        }
    }
}

/// Summary of a committed transaction, as sent to `/ws/transactions`
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub hash: String,
    pub block_height: u64,
    pub from_address: String,
    pub to_address: Option<String>,
}

impl From<&Transaction> for TransactionSummary {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: format!("{:#x}", tx.hash),
            block_height: tx.block_height,
            from_address: format!("{:#x}", tx.from_address),
            to_address: tx.to_address.map(|a| format!("{:#x}", a)),
        }
    }
}

/// Fans out block and transaction summaries to WebSocket subscribers over
/// two independent broadcast channels.
pub struct Broadcaster {
    block_tx: broadcast::Sender<BlockSummary>,
    transaction_tx: broadcast::Sender<TransactionSummary>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (block_tx, _) = broadcast::channel(1000);
        let (transaction_tx, _) = broadcast::channel(1000);
        Self {
            block_tx,
            transaction_tx,
        }
    }

    /// Publish a block summary. A send error (no subscribers, or a lagged
    /// slow subscriber) is not propagated — ingestion never waits on it.
    pub fn broadcast_block(&self, block: &Block) {
        let _ = self.block_tx.send(block.into());
    }

    /// Publish a transaction summary. Same non-blocking, drop-on-full
    /// semantics as `broadcast_block`.
    pub fn broadcast_transaction(&self, tx: &Transaction) {
        let _ = self.transaction_tx.send(tx.into());
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ws_blocks_handler(
    ws: WebSocketUpgrade,
    Extension(broadcaster): Extension<Arc<Broadcaster>>,
) -> Response {
    ws.on_upgrade(|socket| handle_block_socket(socket, broadcaster))
}

pub async fn ws_transactions_handler(
    ws: WebSocketUpgrade,
    Extension(broadcaster): Extension<Arc<Broadcaster>>,
) -> Response {
    ws.on_upgrade(|socket| handle_transaction_socket(socket, broadcaster))
}

async fn handle_block_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = broadcaster.block_tx.subscribe();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_transaction_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = broadcaster.transaction_tx.subscribe();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::{H160, H256};

    #[test]
    fn block_summary_formats_hash_and_miner_as_hex() {
        let block = Block {
            height: 10,
            hash: H256::repeat_byte(0xab),
            parent_hash: H256::zero(),
            timestamp: 1_700_000_000,
            miner: H160::repeat_byte(0xcd),
            gas_used: 21_000,
            gas_limit: 30_000_000,
            tx_count: 2,
            orphaned: false,
        };
        let summary: BlockSummary = (&block).into();
        assert_eq!(summary.height, 10);
        assert!(summary.hash.starts_with("0x"));
        assert!(summary.miner.starts_with("0x"));
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_does_not_panic() {
        let broadcaster = Broadcaster::new();
        let block = Block {
            height: 1,
            hash: H256::zero(),
            parent_hash: H256::zero(),
            timestamp: 0,
            miner: H160::zero(),
            gas_used: 0,
            gas_limit: 0,
            tx_count: 0,
            orphaned: false,
        };
        broadcaster.broadcast_block(&block);
    }
}
