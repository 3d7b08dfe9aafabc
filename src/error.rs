/// Error taxonomy shared by the RPC gateway, store, and coordinators.
///
/// Mirrors the classifier described for the RPC gateway: every error that
/// can originate from the chain or the store carries enough information to
/// decide whether a caller should retry, skip, or abort.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("rpc: invalid parameter or malformed request: {0}")]
    PermanentRpc(String),

    #[error("rpc: transient failure: {0}")]
    TransientRpc(String),

    #[error("rpc: request timed out: {0}")]
    TimeoutRpc(String),

    #[error("rpc: rate limited: {0}")]
    RateLimitRpc(String),

    #[error("store: conflicting write ignored: {0}")]
    StoreConflict(String),

    #[error("store: failure: {0}")]
    StoreFailure(String),

    #[error("reorg depth exceeds max, manual intervention required (depth={depth}, max={max})")]
    ReorgTooDeep { depth: u64, max: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Retry classification for RPC-sourced errors, used by the gateway's retry
/// loop to decide whether to sleep-and-retry or give up immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Permanent,
    Transient,
    RateLimit,
    Timeout,
}

impl IndexerError {
    /// Classify this error for retry purposes. Only meaningful for
    /// RPC-sourced variants; store/config/cancellation errors return `None`
    /// because the gateway's retry loop never sees them.
    pub fn retry_class(&self) -> Option<RetryClass> {
        match self {
            IndexerError::PermanentRpc(_) => Some(RetryClass::Permanent),
            IndexerError::TransientRpc(_) => Some(RetryClass::Transient),
            IndexerError::TimeoutRpc(_) => Some(RetryClass::Timeout),
            IndexerError::RateLimitRpc(_) => Some(RetryClass::RateLimit),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexerError::Cancelled)
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                IndexerError::StoreConflict(db_err.message().to_string())
            }
            _ => IndexerError::StoreFailure(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rpc_errors() {
        assert_eq!(
            IndexerError::PermanentRpc("bad param".into()).retry_class(),
            Some(RetryClass::Permanent)
        );
        assert_eq!(
            IndexerError::TransientRpc("reset".into()).retry_class(),
            Some(RetryClass::Transient)
        );
        assert_eq!(IndexerError::Cancelled.retry_class(), None);
    }

    #[test]
    fn recognizes_cancellation() {
        assert!(IndexerError::Cancelled.is_cancelled());
        assert!(!IndexerError::StoreFailure("x".into()).is_cancelled());
    }
}
