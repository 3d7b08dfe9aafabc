/// Typed, retry-wrapped access to the chain's JSON-RPC surface.
///
/// `ChainSource` is the capability trait the rest of the crate programs
/// against; `RpcGateway` is the `reqwest`-backed production implementation,
/// and `test_support::FakeChain` is an in-memory stand-in used by unit tests
/// that would otherwise need a live node.
use crate::error::{IndexerError, RetryClass};
use crate::metrics;
use crate::model::RawBlock;
use async_trait::async_trait;
use ethereum_types::H256;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a block fetch. A height past the chain's current tip is not an
/// error — the caller (live-tail) treats it as "nothing to do yet".
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(RawBlock),
    NotYetProduced,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn chain_id(&self) -> Result<u64, IndexerError>;
    async fn block_number(&self) -> Result<u64, IndexerError>;
    async fn get_block_by_number(&self, height: u64) -> Result<FetchOutcome, IndexerError>;
}

/// `reqwest`-backed JSON-RPC client with classifying error handling and
/// exponential backoff, bounded by `max_retries`.
pub struct RpcGateway {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    timeout: Duration,
}

impl RpcGateway {
    pub fn new(url: String, max_retries: u32, timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            max_retries,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn redacted_url(&self) -> String {
        match self.url.split_once('?') {
            Some((base, _)) => format!("{base}?<redacted>"),
            None => self.url.clone(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, IndexerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let timer = metrics::Timer::new();
            let outcome = self.send_once(method, &body).await;
            metrics::record_rpc_call_duration(method, timer.elapsed_secs());

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let class = err.retry_class().unwrap_or(RetryClass::Permanent);
                    metrics::increment_rpc_errors(method, class_label(class));

                    if class == RetryClass::Permanent || attempt > self.max_retries {
                        return Err(err);
                    }

                    metrics::increment_rpc_retry_attempts(method);
                    let backoff = backoff_for(attempt);
                    warn!(
                        method,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        url = %self.redacted_url(),
                        "rpc call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn send_once(&self, method: &str, body: &Value) -> Result<Value, IndexerError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(method, &e))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexerError::RateLimitRpc(format!(
                "{method}: rate limited by node"
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(IndexerError::TransientRpc(format!(
                "{method}: http status {status}"
            )));
        }

        let payload: RpcResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::TransientRpc(format!("{method}: bad json body: {e}")))?;

        if let Some(err) = payload.error {
            return Err(classify_rpc_error(method, err.code, &err.message));
        }

        payload
            .result
            .ok_or_else(|| IndexerError::TransientRpc(format!("{method}: empty result")))
    }
}

#[async_trait]
impl ChainSource for RpcGateway {
    async fn chain_id(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_chainId", json!([])).await?;
        parse_hex_u64(&result, "eth_chainId")
    }

    async fn block_number(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result, "eth_blockNumber")
    }

    async fn get_block_by_number(&self, height: u64) -> Result<FetchOutcome, IndexerError> {
        let hex_height = format!("0x{height:x}");
        let result = self
            .call("eth_getBlockByNumber", json!([hex_height, true]))
            .await?;

        if result.is_null() {
            debug!(height, "block not yet produced");
            return Ok(FetchOutcome::NotYetProduced);
        }

        let block: RawBlock = serde_json::from_value(result).map_err(|e| {
            IndexerError::PermanentRpc(format!("eth_getBlockByNumber: malformed block: {e}"))
        })?;
        Ok(FetchOutcome::Found(block))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

fn classify_rpc_error(method: &str, code: i64, message: &str) -> IndexerError {
    match code {
        -32005 => IndexerError::RateLimitRpc(format!("{method}: {message}")),
        -32000 | -32603 => IndexerError::TransientRpc(format!("{method}: {message}")),
        _ => IndexerError::PermanentRpc(format!("{method}: {message} (code {code})")),
    }
}

fn classify_transport_error(method: &str, e: &reqwest::Error) -> IndexerError {
    if e.is_timeout() {
        IndexerError::TimeoutRpc(format!("{method}: {e}"))
    } else if e.is_connect() {
        IndexerError::TransientRpc(format!("{method}: connection failed: {e}"))
    } else {
        IndexerError::TransientRpc(format!("{method}: {e}"))
    }
}

fn class_label(class: RetryClass) -> &'static str {
    match class {
        RetryClass::Permanent => "permanent",
        RetryClass::Transient => "transient",
        RetryClass::RateLimit => "rate_limit",
        RetryClass::Timeout => "timeout",
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let capped = attempt.min(6);
    Duration::from_secs(2u64.pow(capped))
}

fn parse_hex_u64(value: &Value, method: &str) -> Result<u64, IndexerError> {
    let s = value
        .as_str()
        .ok_or_else(|| IndexerError::PermanentRpc(format!("{method}: expected hex string")))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16)
        .map_err(|e| IndexerError::PermanentRpc(format!("{method}: invalid hex u64: {e}")))
}

pub fn parse_h256(s: &str) -> Result<H256, IndexerError> {
    s.parse()
        .map_err(|_| IndexerError::PermanentRpc(format!("invalid hash: {s}")))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_code() {
        let err = classify_rpc_error("eth_blockNumber", -32005, "limit exceeded");
        assert_eq!(err.retry_class(), Some(RetryClass::RateLimit));
    }

    #[test]
    fn classifies_unknown_code_as_permanent() {
        let err = classify_rpc_error("eth_getBlockByNumber", -32602, "invalid params");
        assert_eq!(err.retry_class(), Some(RetryClass::Permanent));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let short = backoff_for(1);
        let long = backoff_for(10);
        assert!(long > short);
        assert_eq!(backoff_for(10), backoff_for(6));
    }

    #[test]
    fn parses_hex_u64() {
        let v = Value::String("0x10".to_string());
        assert_eq!(parse_hex_u64(&v, "test").unwrap(), 16);
    }

    #[tokio::test]
    async fn fake_chain_reports_not_yet_produced_past_tip() {
        let chain = test_support::FakeChain::new(1);
        let outcome = chain.get_block_by_number(5).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::NotYetProduced));
    }
}
