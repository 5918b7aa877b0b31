//! Sweep scheduler: reclaims funds stranded at intermediate addresses.
//!
//! This is what makes backup-before-transfer protective: as long as a
//! hop's recovery record persisted, any funds left at its address — after
//! a crash, a network failure, or an abandoned session — are eventually
//! moved to the recovery destination. Sweeps are idempotent and never mark
//! a record swept on failure.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info, warn};
use tumbler_common::{
    unix_time_secs, Address, Amount, LedgerClient, SecretCipher, TransferStatus, TxRef,
};
use uuid::Uuid;

use crate::{
    error::MixError,
    keys::derive_address,
    recovery::{HopRecoveryRecord, RecoveryLedger},
};

#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Where reclaimed funds are sent.
    pub recovery_destination: Address,
    /// Network fee withheld from each sweep transfer.
    pub network_fee: Amount,
    /// Interval between scheduler scans.
    pub poll_interval: Duration,
    /// Bounded ledger attempts per record and scan.
    pub max_attempts: u32,
    /// Base backoff between attempts, doubled per attempt.
    pub backoff_base: Duration,
    pub confirm_poll_interval: Duration,
    pub confirm_timeout: Duration,
}

impl SweepConfig {
    pub fn new(recovery_destination: Address) -> Self {
        Self {
            recovery_destination,
            network_fee: 10_000,
            poll_interval: Duration::from_secs(30),
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            confirm_poll_interval: Duration::from_secs(2),
            confirm_timeout: Duration::from_secs(120),
        }
    }
}

/// What a single sweep pass did with a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Record was already swept; nothing happened.
    AlreadySwept,
    /// Zero recoverable balance; record marked swept without a transfer.
    NothingToRecover,
    Recovered { amount: Amount, tx_ref: TxRef },
}

/// Background worker scanning the recovery ledger for sweepable records.
pub struct SweepScheduler {
    recovery: RecoveryLedger,
    ledger: Arc<dyn LedgerClient>,
    cipher: Arc<dyn SecretCipher>,
    config: SweepConfig,
}

impl SweepScheduler {
    pub fn new(
        recovery: RecoveryLedger,
        ledger: Arc<dyn LedgerClient>,
        cipher: Arc<dyn SecretCipher>,
        config: SweepConfig,
    ) -> Self {
        Self {
            recovery,
            ledger,
            cipher,
            config,
        }
    }

    /// Scan-and-sweep loop. Runs until the task is dropped.
    pub async fn run(&self) {
        info!(
            destination = %self.config.recovery_destination,
            interval_secs = self.config.poll_interval.as_secs(),
            "sweep scheduler started"
        );
        loop {
            self.run_once(unix_time_secs()).await;
            sleep(self.config.poll_interval).await;
        }
    }

    /// One scan over the sweepable set. Returns how many records were
    /// resolved (funds recovered or marked empty) this pass.
    pub async fn run_once(&self, now: u64) -> usize {
        let sweepable = match self.recovery.list_sweepable(now) {
            Ok(records) => records,
            Err(err) => {
                error!(code = err.error_code(), "sweep scan failed: {err}");
                return 0;
            }
        };

        let mut resolved = 0;
        for record in sweepable {
            let session_id = record.session_id;
            let hop_index = record.hop_index;
            match self.sweep(&session_id, hop_index).await {
                Ok(SweepOutcome::Recovered { amount, tx_ref }) => {
                    info!(session = %session_id, hop = hop_index, amount, tx = %tx_ref, "funds swept");
                    resolved += 1;
                }
                Ok(SweepOutcome::NothingToRecover) => {
                    info!(session = %session_id, hop = hop_index, "nothing to recover");
                    resolved += 1;
                }
                Ok(SweepOutcome::AlreadySwept) => {}
                Err(err) if err.is_retryable() => {
                    // Left unswept on purpose: the next scan retries it.
                    warn!(
                        session = %session_id,
                        hop = hop_index,
                        code = err.error_code(),
                        "sweep deferred: {err}"
                    );
                }
                Err(err) => {
                    error!(
                        session = %session_id,
                        hop = hop_index,
                        code = err.error_code(),
                        "sweep aborted: {err}"
                    );
                }
            }
        }
        resolved
    }

    /// Sweep a single record. Idempotent: an already-swept record is a
    /// no-op, and failures leave `swept = false` for a later retry.
    pub async fn sweep(&self, session_id: &Uuid, hop_index: u32) -> Result<SweepOutcome, MixError> {
        let Some((record, version)) = self.recovery.get(session_id, hop_index)? else {
            return Err(MixError::RecordNotFound(format!(
                "session {session_id} hop {hop_index}"
            )));
        };
        if record.swept {
            return Ok(SweepOutcome::AlreadySwept);
        }

        let balance = self
            .with_backoff(|| async { self.ledger.get_balance(&record.address).await })
            .await?;
        if balance <= self.config.network_fee {
            self.recovery.mark_swept(session_id, hop_index, version, None)?;
            return Ok(SweepOutcome::NothingToRecover);
        }

        self.verify_secret(&record)?;

        let amount = balance - self.config.network_fee;
        let tx_ref = self
            .with_backoff(|| async {
                self.ledger
                    .submit_transfer(&record.address, &self.config.recovery_destination, amount)
                    .await
            })
            .await?;
        self.await_confirmation(&tx_ref).await?;

        self.recovery
            .mark_swept(session_id, hop_index, version, Some(tx_ref.clone()))?;
        Ok(SweepOutcome::Recovered { amount, tx_ref })
    }

    /// Decrypt the backed-up secret and check it still controls the
    /// recorded address. The plaintext lives only within this scope and
    /// is zeroized on drop.
    fn verify_secret(&self, record: &HopRecoveryRecord) -> Result<(), MixError> {
        let secret = self.cipher.decrypt(&record.encrypted_secret)?;
        let derived = derive_address(secret.as_slice());
        if derived != record.address {
            let err = MixError::CorruptBackup(format!(
                "secret for session {} hop {} derives {derived}, record says {}",
                record.session_id, record.hop_index, record.address
            ));
            error!(code = err.error_code(), "{err}");
            return Err(err);
        }
        Ok(())
    }

    async fn with_backoff<T, F, Fut>(&self, op: F) -> Result<T, MixError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_error = err.to_string();
                    warn!(attempt, "ledger call failed: {last_error}");
                    if attempt < self.config.max_attempts {
                        sleep(self.config.backoff_base * 2u32.saturating_pow(attempt - 1)).await;
                    }
                }
            }
        }
        Err(MixError::RetriesExhausted(format!(
            "{} attempts: {last_error}",
            self.config.max_attempts
        )))
    }

    async fn await_confirmation(&self, tx_ref: &TxRef) -> Result<(), MixError> {
        let deadline = tokio::time::Instant::now() + self.config.confirm_timeout;
        loop {
            let status = self
                .ledger
                .get_status(tx_ref)
                .await
                .map_err(|err| MixError::Ledger(err.to_string()))?;
            match status {
                TransferStatus::Confirmed => return Ok(()),
                TransferStatus::Rejected => {
                    return Err(MixError::LedgerRejected(tx_ref.to_string()))
                }
                TransferStatus::Unconfirmed => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(MixError::LedgerUnconfirmed(tx_ref.to_string()));
                    }
                    sleep(self.config.confirm_poll_interval).await;
                }
            }
        }
    }
}
