//! Error types for the privacy pool.

use thiserror::Error;

/// Aggregated error type for pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Deposit amount does not match any fixed denomination tier.
    #[error("unsupported tier: {0}")]
    UnsupportedTier(String),

    /// The commitment tree has reached 2^depth leaves.
    #[error("pool is full: capacity {0} reached")]
    PoolFull(u64),

    /// Append-only/dense-index invariant broken. Fatal.
    #[error("tree corruption: {0}")]
    TreeCorruption(String),

    /// The claimed root was never held by the tree (or fell out of the
    /// retained history window).
    #[error("unknown root: {0}")]
    UnknownRoot(String),

    /// Cryptographic verification rejected the proof.
    #[error("invalid proof")]
    InvalidProof,

    /// The nullifier was already consumed by an earlier withdrawal.
    #[error("nullifier already spent")]
    AlreadySpent,

    /// Proof backend did not answer within the configured deadline.
    #[error("prover timed out after {0} ms")]
    ProverTimeout(u64),

    /// Proof backend transport failure.
    #[error("proof backend error: {0}")]
    Backend(String),

    /// Nullifier/commitment storage failure.
    #[error("store error: {0}")]
    Store(String),
}

impl PoolError {
    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            PoolError::UnsupportedTier(_) => "UNSUPPORTED_TIER",
            PoolError::PoolFull(_) => "POOL_FULL",
            PoolError::TreeCorruption(_) => "TREE_CORRUPTION",
            PoolError::UnknownRoot(_) => "UNKNOWN_ROOT",
            PoolError::InvalidProof => "PROOF_INVALID",
            PoolError::AlreadySpent => "NULLIFIER_SPENT",
            PoolError::ProverTimeout(_) => "PROVER_TIMEOUT",
            PoolError::Backend(_) => "PROOF_BACKEND_ERROR",
            PoolError::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether retrying the same call can succeed. Input and state errors
    /// are final; only transport-level failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::ProverTimeout(_) | PoolError::Backend(_) | PoolError::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(PoolError::InvalidProof.error_code(), "PROOF_INVALID");
        assert_eq!(PoolError::AlreadySpent.error_code(), "NULLIFIER_SPENT");
        assert_eq!(PoolError::ProverTimeout(100).error_code(), "PROVER_TIMEOUT");
    }

    #[test]
    fn only_external_failures_retry() {
        assert!(PoolError::ProverTimeout(1).is_retryable());
        assert!(PoolError::Backend("down".into()).is_retryable());
        assert!(!PoolError::InvalidProof.is_retryable());
        assert!(!PoolError::AlreadySpent.is_retryable());
        assert!(!PoolError::TreeCorruption("gap".into()).is_retryable());
    }
}
