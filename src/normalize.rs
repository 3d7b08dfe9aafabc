/// Pure transformation from the RPC's wire shapes into store-ready records.
///
/// Recovers each transaction's sender from its ECDSA signature rather than
/// trusting a `from` field the node already computed, and reconstructs the
/// legacy RLP signing hash to do so.
use crate::error::IndexerError;
use crate::model::{Block, NormalizedBlock, RawBlock, RawTransaction, Transaction};
use bigdecimal::BigDecimal;
use ethereum_types::{H160, U256};
use num_bigint::BigUint;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SECP256K1};
use sha3::{Digest, Keccak256};
use tracing::warn;

/// Normalize a raw block and its embedded transactions. This never marks a
/// block orphaned; orphaning is the reorg resolver's job. A transaction
/// whose sender cannot be recovered is still emitted, with the zero address
/// substituted — see `recover_sender`.
pub fn normalize_block(raw: RawBlock) -> Result<NormalizedBlock, IndexerError> {
    let height = raw.number.as_u64();
    let tx_count = raw.transactions.len() as u32;

    let transactions = raw
        .transactions
        .iter()
        .map(|tx| normalize_transaction(tx, height))
        .collect::<Result<Vec<_>, _>>()?;

    let block = Block {
        height,
        hash: raw.hash,
        parent_hash: raw.parent_hash,
        timestamp: raw.timestamp.as_u64() as i64,
        miner: raw.miner,
        gas_used: raw.gas_used.as_u64(),
        gas_limit: raw.gas_limit.as_u64(),
        tx_count,
        orphaned: false,
    };

    Ok(NormalizedBlock {
        block,
        transactions,
    })
}

fn normalize_transaction(raw: &RawTransaction, block_height: u64) -> Result<Transaction, IndexerError> {
    let input = hex_to_bytes(&raw.input)
        .map_err(|e| IndexerError::PermanentRpc(format!("transaction {}: {e}", raw.hash)))?;

    let from_address = recover_sender(raw).unwrap_or_else(|e| {
        warn!(tx_hash = %raw.hash, error = %e, "sender recovery failed, substituting zero address");
        H160::zero()
    });

    let gas_used = raw.gas.as_u64();
    let fee_wei = u256_to_bigdecimal(raw.gas_price) * BigDecimal::from(gas_used);

    Ok(Transaction {
        hash: raw.hash,
        block_height,
        tx_index: raw.transaction_index.as_u32(),
        from_address,
        to_address: raw.to,
        value_wei: u256_to_bigdecimal(raw.value),
        fee_wei,
        nonce: raw.nonce.as_u64(),
        input,
    })
}

/// Recover the sender address from a legacy transaction's `(v, r, s)`
/// signature by reconstructing the RLP signing hash and running ECDSA
/// public-key recovery. Every failure path here (bad `v`, malformed
/// signature, a digest `recover_ecdsa` rejects) is reported to the caller,
/// which substitutes the zero address and logs rather than treating it as
/// fatal — the transaction itself is never dropped on a bad signature.
fn recover_sender(raw: &RawTransaction) -> Result<H160, IndexerError> {
    let signing_hash = legacy_signing_hash(raw);

    let recovery_id = legacy_recovery_id(raw.v)?;
    let mut sig_bytes = [0u8; 64];
    raw.r.to_big_endian(&mut sig_bytes[0..32]);
    raw.s.to_big_endian(&mut sig_bytes[32..64]);

    let recoverable = RecoverableSignature::from_compact(&sig_bytes, recovery_id)
        .map_err(|e| IndexerError::PermanentRpc(format!("bad signature: {e}")))?;
    let message = Message::from_digest_slice(signing_hash.as_bytes())
        .map_err(|e| IndexerError::PermanentRpc(format!("bad signing hash: {e}")))?;

    let pubkey = SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| IndexerError::PermanentRpc(format!("recovery failed: {e}")))?;

    Ok(public_key_to_address(&pubkey))
}

fn public_key_to_address(pubkey: &secp256k1::PublicKey) -> H160 {
    let uncompressed = pubkey.serialize_uncompressed();
    let hash = Keccak256::digest(&uncompressed[1..]);
    H160::from_slice(&hash[12..])
}

fn legacy_recovery_id(v: U256) -> Result<RecoveryId, IndexerError> {
    let v = v.as_u64();
    let id = if v >= 35 {
        // EIP-155: v = chain_id * 2 + 35 + recovery_id
        ((v - 35) % 2) as i32
    } else if v == 27 || v == 28 {
        (v - 27) as i32
    } else {
        return Err(IndexerError::PermanentRpc(format!("unexpected v value: {v}")));
    };
    RecoveryId::from_i32(id).map_err(|e| IndexerError::PermanentRpc(format!("bad recovery id: {e}")))
}

/// The signing hash for a legacy Ethereum transaction: keccak256 of the RLP
/// encoding of `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]` when
/// EIP-155 replay protection is present, or `[nonce, gasPrice, gas, to,
/// value, data]` otherwise.
fn legacy_signing_hash(raw: &RawTransaction) -> ethereum_types::H256 {
    let mut stream = rlp::RlpStream::new();
    let v = raw.v.as_u64();
    let eip155 = v >= 35;
    let chain_id = if eip155 { Some((v - 35) / 2) } else { None };

    let field_count = if eip155 { 9 } else { 6 };
    stream.begin_list(field_count);
    stream.append(&raw.nonce);
    stream.append(&raw.gas_price);
    stream.append(&raw.gas);
    match raw.to {
        Some(to) => {
            stream.append(&to);
        }
        None => {
            stream.append_empty_data();
        }
    }
    stream.append(&raw.value);
    let input = hex_to_bytes(&raw.input).unwrap_or_default();
    stream.append(&input);

    if let Some(chain_id) = chain_id {
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
    }

    let encoded = stream.out();
    let hash = Keccak256::digest(&encoded);
    ethereum_types::H256::from_slice(&hash)
}

fn hex_to_bytes(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}

fn u256_to_bigdecimal(value: U256) -> BigDecimal {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigDecimal::from(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::{H160, H256};

    fn sample_raw_tx() -> RawTransaction {
        RawTransaction {
            hash: H256::repeat_byte(0xab),
            transaction_index: U256::from(0),
            to: Some(H160::repeat_byte(0x11)),
            value: U256::from(1_000_000_000_000_000_000u64),
            gas: U256::from(21_000),
            gas_price: U256::from(20_000_000_000u64),
            nonce: U256::from(7),
            input: "0x".to_string(),
            v: U256::from(27),
            r: U256::from(1),
            s: U256::from(1),
        }
    }

    #[test]
    fn legacy_recovery_id_handles_pre_and_post_eip155() {
        assert_eq!(legacy_recovery_id(U256::from(27)).unwrap(), RecoveryId::from_i32(0).unwrap());
        assert_eq!(legacy_recovery_id(U256::from(28)).unwrap(), RecoveryId::from_i32(1).unwrap());
        // chain id 1, recovery id 0: v = 1*2 + 35 = 37
        assert_eq!(legacy_recovery_id(U256::from(37)).unwrap(), RecoveryId::from_i32(0).unwrap());
    }

    #[test]
    fn legacy_recovery_id_rejects_bad_v() {
        assert!(legacy_recovery_id(U256::from(5)).is_err());
    }

    #[test]
    fn unrecoverable_signature_substitutes_zero_address_not_an_error() {
        let mut raw = sample_raw_tx();
        raw.v = U256::from(5); // not 27/28 and not EIP-155-shaped: guaranteed recovery failure
        let tx = normalize_transaction(&raw, 100).unwrap();
        assert_eq!(tx.from_address, H160::zero());
    }

    #[test]
    fn fee_wei_is_gas_times_gas_price() {
        let raw = sample_raw_tx();
        let tx = normalize_transaction(&raw, 100).unwrap();
        assert_eq!(
            tx.fee_wei,
            BigDecimal::from(20_000_000_000u64) * BigDecimal::from(21_000u64)
        );
    }

    #[test]
    fn u256_to_bigdecimal_roundtrips_small_values() {
        let v = U256::from(42u64);
        assert_eq!(u256_to_bigdecimal(v), BigDecimal::from(42));
    }

    #[test]
    fn hex_to_bytes_strips_prefix() {
        assert_eq!(hex_to_bytes("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(hex_to_bytes("0a0b").unwrap(), vec![0x0a, 0x0b]);
    }
}
