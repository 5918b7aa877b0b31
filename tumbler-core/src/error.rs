//! Error types for the mixing core.

use thiserror::Error;
use tumbler_common::{CipherError, StoreError};
use uuid::Uuid;

/// Aggregated error type for orchestrator, recovery and sweep operations.
#[derive(Debug, Error)]
pub enum MixError {
    /// Gross amount is below the minimum tier or off-denomination.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Unrecognized privacy profile name.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    /// The requested state change is not in the transition table, or an
    /// operation ran against a session in the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Execution attempted before every hop's recovery record was
    /// durably committed.
    #[error("backup incomplete: {0}")]
    BackupIncomplete(String),

    /// Checkpoint claimed before the ledger reported confirmation.
    #[error("ledger has not confirmed transfer: {0}")]
    LedgerUnconfirmed(String),

    /// The ledger rejected a submitted transfer.
    #[error("ledger rejected transfer: {0}")]
    LedgerRejected(String),

    /// Ledger transport failure.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Optimistic-concurrency conflict on a session or recovery record.
    #[error("concurrent update: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    /// No recovery record exists for the referenced hop.
    #[error("recovery record not found: {0}")]
    RecordNotFound(String),

    /// A backup decrypted to secret material that does not match its
    /// recorded address. Fatal: the record was tampered with or corrupted.
    #[error("corrupt backup: {0}")]
    CorruptBackup(String),

    /// Two sweepers raced on the same record. Fatal.
    #[error("double sweep attempt: {0}")]
    DoubleSweep(String),

    /// Bounded retries were exhausted against an external collaborator.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

impl MixError {
    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            MixError::InvalidAmount(_) => "INVALID_AMOUNT",
            MixError::InvalidProfile(_) => "INVALID_PROFILE",
            MixError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            MixError::InvalidTransition(_) => "INVALID_TRANSITION",
            MixError::BackupIncomplete(_) => "BACKUP_INCOMPLETE",
            MixError::LedgerUnconfirmed(_) => "LEDGER_UNCONFIRMED",
            MixError::LedgerRejected(_) => "LEDGER_REJECTED",
            MixError::Ledger(_) => "LEDGER_ERROR",
            MixError::Conflict(_) => "CONCURRENT_UPDATE",
            MixError::Store(_) => "STORE_ERROR",
            MixError::Cipher(_) => "CIPHER_ERROR",
            MixError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            MixError::CorruptBackup(_) => "CORRUPT_BACKUP",
            MixError::DoubleSweep(_) => "DOUBLE_SWEEP",
            MixError::RetriesExhausted(_) => "RETRIES_EXHAUSTED",
        }
    }

    /// Whether the same call can succeed later. Input and state errors are
    /// final; invariant violations are fatal and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MixError::LedgerUnconfirmed(_)
                | MixError::LedgerRejected(_)
                | MixError::Ledger(_)
                | MixError::Conflict(_)
                | MixError::Store(_)
        )
    }
}

impl From<StoreError> for MixError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => MixError::Conflict(err.to_string()),
            other => MixError::Store(other.to_string()),
        }
    }
}

impl From<CipherError> for MixError {
    fn from(err: CipherError) -> Self {
        MixError::Cipher(err.to_string())
    }
}
