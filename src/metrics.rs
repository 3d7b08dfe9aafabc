/// Prometheus instrumentation for the indexer.
///
/// Scoped to the counters and gauges the backfill/live-tail/reorg components
/// actually emit: throughput counters paired with "where are we now" gauges,
/// in the same registry-plus-helper-functions shape used throughout this
/// codebase's other instrumented modules.
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::time::Instant;

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Blocks successfully committed to the store.
    pub static ref BLOCKS_INSERTED: IntCounter = IntCounter::new(
        "eth_indexer_blocks_inserted_total",
        "Total blocks committed to the store"
    ).unwrap();

    /// Backfill batches processed, one per Semaphore-bounded worker task.
    pub static ref BATCHES_PROCESSED: IntCounter = IntCounter::new(
        "eth_indexer_batches_processed_total",
        "Total backfill batches processed"
    ).unwrap();

    /// Backfill errors, by kind (rpc, store).
    pub static ref BACKFILL_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("eth_indexer_backfill_errors_total", "Backfill errors by kind"),
        &["kind"]
    ).unwrap();

    /// RPC errors, by method and retry class.
    pub static ref RPC_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("eth_indexer_rpc_errors_total", "RPC errors by method and class"),
        &["method", "class"]
    ).unwrap();

    /// RPC retry attempts, by method.
    pub static ref RPC_RETRY_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("eth_indexer_rpc_retry_attempts_total", "RPC retry attempts by method"),
        &["method"]
    ).unwrap();

    /// RPC call latency, by method.
    pub static ref RPC_CALL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("eth_indexer_rpc_call_duration_seconds", "RPC call latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["method"]
    ).unwrap();

    /// Live-tail steps, by outcome (advanced, not_yet_produced, reorg, error).
    pub static ref LIVETAIL_STEPS: IntCounterVec = IntCounterVec::new(
        Opts::new("eth_indexer_livetail_steps_total", "Live-tail steps by outcome"),
        &["outcome"]
    ).unwrap();

    /// Reorgs detected and handled.
    pub static ref REORG_DETECTED: IntCounter = IntCounter::new(
        "eth_indexer_reorg_detected_total",
        "Total reorgs detected"
    ).unwrap();

    /// Depth of the most recently resolved reorg.
    pub static ref REORG_DEPTH: IntGauge = IntGauge::new(
        "eth_indexer_reorg_depth",
        "Depth of the most recently resolved reorg"
    ).unwrap();

    /// Blocks marked orphaned by reorg resolution.
    pub static ref ORPHANED_BLOCKS: IntCounter = IntCounter::new(
        "eth_indexer_orphaned_blocks_total",
        "Total blocks marked orphaned"
    ).unwrap();

    /// Highest canonical height present in the store.
    pub static ref STORE_HEAD_HEIGHT: IntGauge = IntGauge::new(
        "eth_indexer_store_head_height",
        "Highest canonical block height in the store"
    ).unwrap();

    /// Distance between the chain tip and the store head.
    pub static ref CHAIN_TIP_LAG: IntGauge = IntGauge::new(
        "eth_indexer_chain_tip_lag_blocks",
        "Blocks between the chain tip and the store head"
    ).unwrap();

    /// Process start time, seconds since epoch.
    pub static ref SERVICE_START_TIMESTAMP: IntGauge = IntGauge::new(
        "eth_indexer_service_start_timestamp",
        "Unix timestamp the service started at"
    ).unwrap();
}

pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(BLOCKS_INSERTED.clone()))?;
    REGISTRY.register(Box::new(BATCHES_PROCESSED.clone()))?;
    REGISTRY.register(Box::new(BACKFILL_ERRORS.clone()))?;
    REGISTRY.register(Box::new(RPC_ERRORS.clone()))?;
    REGISTRY.register(Box::new(RPC_RETRY_ATTEMPTS.clone()))?;
    REGISTRY.register(Box::new(RPC_CALL_DURATION.clone()))?;
    REGISTRY.register(Box::new(LIVETAIL_STEPS.clone()))?;
    REGISTRY.register(Box::new(REORG_DETECTED.clone()))?;
    REGISTRY.register(Box::new(REORG_DEPTH.clone()))?;
    REGISTRY.register(Box::new(ORPHANED_BLOCKS.clone()))?;
    REGISTRY.register(Box::new(STORE_HEAD_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(CHAIN_TIP_LAG.clone()))?;
    REGISTRY.register(Box::new(SERVICE_START_TIMESTAMP.clone()))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    SERVICE_START_TIMESTAMP.set(now as i64);

    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn increment_blocks_inserted(count: u64) {
    BLOCKS_INSERTED.inc_by(count);
}

pub fn increment_batches_processed() {
    BATCHES_PROCESSED.inc();
}

pub fn increment_backfill_errors(kind: &str) {
    BACKFILL_ERRORS.with_label_values(&[kind]).inc();
}

pub fn increment_rpc_errors(method: &str, class: &str) {
    RPC_ERRORS.with_label_values(&[method, class]).inc();
}

pub fn increment_rpc_retry_attempts(method: &str) {
    RPC_RETRY_ATTEMPTS.with_label_values(&[method]).inc();
}

pub fn record_rpc_call_duration(method: &str, duration_secs: f64) {
    RPC_CALL_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

pub fn increment_livetail_steps(outcome: &str) {
    LIVETAIL_STEPS.with_label_values(&[outcome]).inc();
}

pub fn increment_reorg_detected() {
    REORG_DETECTED.inc();
}

pub fn set_reorg_depth(depth: i64) {
    REORG_DEPTH.set(depth);
}

pub fn increment_orphaned_blocks(count: u64) {
    ORPHANED_BLOCKS.inc_by(count);
}

pub fn set_store_head_height(height: i64) {
    STORE_HEAD_HEIGHT.set(height);
}

pub fn set_chain_tip_lag(lag: i64) {
    CHAIN_TIP_LAG.set(lag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_nonnegative_duration() {
        let t = Timer::new();
        assert!(t.elapsed_secs() >= 0.0);
    }

    #[test]
    fn gather_metrics_produces_text_format() {
        let _ = init_metrics();
        increment_blocks_inserted(1);
        let text = gather_metrics();
        assert!(text.contains("eth_indexer_blocks_inserted_total"));
    }
}
