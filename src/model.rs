/// Domain types shared by every layer of the indexer: the raw/normalized
/// block and transaction records, and the store's view of chain state.
use bigdecimal::BigDecimal;
use ethereum_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};

/// A normalized block, ready to be committed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub timestamp: i64,
    pub miner: H160,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: u32,
    pub orphaned: bool,
}

/// A normalized transaction belonging to a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: H256,
    pub block_height: u64,
    pub tx_index: u32,
    pub from_address: H160,
    pub to_address: Option<H160>,
    pub value_wei: BigDecimal,
    pub fee_wei: BigDecimal,
    pub nonce: u64,
    pub input: Vec<u8>,
}

/// A log emitted by a transaction. The ingestion path never populates this
/// table (no receipts are fetched, per the simplified receipt model) but the
/// schema and type exist so a future receipt-fetching path has somewhere to
/// land rows without a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub tx_hash: H256,
    pub log_index: u32,
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// A block together with its transactions, the unit `normalize` produces and
/// `store::BlockStore::commit_block` writes atomically.
#[derive(Debug, Clone)]
pub struct NormalizedBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

/// Minimal JSON-RPC-shaped view of a block, as returned by
/// `eth_getBlockByNumber`. Kept separate from `Block` so `normalize` has an
/// explicit seam between "what the chain said" and "what we store".
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawBlock {
    pub number: U256,
    pub hash: H256,
    #[serde(rename = "parentHash")]
    pub parent_hash: H256,
    pub timestamp: U256,
    pub miner: H160,
    #[serde(rename = "gasUsed")]
    pub gas_used: U256,
    #[serde(rename = "gasLimit")]
    pub gas_limit: U256,
    pub transactions: Vec<RawTransaction>,
}

/// Minimal JSON-RPC-shaped view of a legacy transaction as embedded in a
/// `RawBlock`. Signature fields are kept so `normalize` can recover the
/// sender address instead of trusting a `from` field the node already
/// computed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTransaction {
    pub hash: H256,
    #[serde(rename = "transactionIndex")]
    pub transaction_index: U256,
    pub to: Option<H160>,
    pub value: U256,
    pub gas: U256,
    #[serde(rename = "gasPrice")]
    pub gas_price: U256,
    pub nonce: U256,
    pub input: String,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_equality_is_field_wise() {
        let b = Block {
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
        assert_eq!(b.clone(), b);
    }
}
