//! Mix orchestrator: drives a session through its hop sequence.
//!
//! Every state change is one versioned compare-and-swap against the
//! session repo, so concurrent callers serialize per session. The central
//! safety rule is backup-before-transfer: no hop transfer is submitted
//! unless that hop's recovery record is durably committed.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};
use tumbler_common::{
    unix_time_secs, Address, Amount, EncryptedSecret, LedgerClient, TransferStatus, TxRef,
};
use uuid::Uuid;

use crate::{
    error::MixError,
    keys::{generate_hop_key, HopKeyMaterial},
    planner::{self, PrivacyProfile},
    recovery::{HopRecoveryRecord, RecoveryLedger},
    session::{MixSession, PlannedHop, SessionRepo, SessionStatus},
};

/// One mixing request as the caller submits it.
#[derive(Clone, Debug)]
pub struct MixRequest {
    pub gross_amount: Amount,
    pub destination: Address,
    pub profile: PrivacyProfile,
    pub referral: Option<Address>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Lifetime of hop backups before they become sweep-eligible.
    pub backup_ttl_secs: u64,
    /// Interval between confirmation polls.
    pub confirm_poll_interval: Duration,
    /// Deadline for one confirmation wait; the hop stays retryable after.
    pub confirm_timeout: Duration,
    /// Bounded attempts per hop before the session is failed.
    pub max_hop_attempts: u32,
    /// Base backoff between hop attempts, doubled per attempt.
    pub retry_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backup_ttl_secs: 24 * 60 * 60,
            confirm_poll_interval: Duration::from_secs(2),
            confirm_timeout: Duration::from_secs(120),
            max_hop_attempts: 5,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// The session state machine over the ledger and recovery-ledger ports.
pub struct MixOrchestrator {
    sessions: SessionRepo,
    recovery: RecoveryLedger,
    ledger: Arc<dyn LedgerClient>,
    config: OrchestratorConfig,
}

impl MixOrchestrator {
    pub fn new(
        sessions: SessionRepo,
        recovery: RecoveryLedger,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self::with_config(sessions, recovery, ledger, OrchestratorConfig::default())
    }

    pub fn with_config(
        sessions: SessionRepo,
        recovery: RecoveryLedger,
        ledger: Arc<dyn LedgerClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions,
            recovery,
            ledger,
            config,
        }
    }

    /// Plan the session, generate its hop keys, and persist it.
    ///
    /// Returns the session (already `AwaitingBackup`) together with the
    /// plaintext key material the caller must encrypt and hand back via
    /// [`save_all_backups`](Self::save_all_backups) before anything moves.
    pub fn create(&self, request: MixRequest) -> Result<(MixSession, Vec<HopKeyMaterial>), MixError> {
        let id = Uuid::new_v4();
        let plan = planner::plan(
            request.gross_amount,
            &request.destination,
            request.profile,
            request.referral.is_some(),
            &id,
        )?;

        let keys: Vec<HopKeyMaterial> = (0..plan.hop_count()).map(|_| generate_hop_key()).collect();
        let hop_plan: Vec<PlannedHop> = plan
            .hops
            .iter()
            .zip(&keys)
            .map(|(spec, key)| PlannedHop {
                address: key.address.clone(),
                amount: spec.amount,
                delay_secs: spec.delay_secs,
            })
            .collect();

        let now = unix_time_secs();
        let hop_count = hop_plan.len();
        let mut session = MixSession {
            id,
            gross_amount: request.gross_amount,
            destination: request.destination,
            referral: request.referral,
            profile: request.profile,
            status: SessionStatus::Pending,
            hop_plan,
            hop_refs: vec![None; hop_count],
            current_hop_index: 0,
            net_amount: plan.net_amount,
            platform_fee: plan.platform_fee,
            referral_fee: plan.referral_fee,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reason: None,
        };
        let version = self.sessions.create(&session)?;

        session.transition(SessionStatus::AwaitingBackup, now)?;
        self.sessions.save(&session, version)?;
        info!(
            session = %session.id,
            hops = hop_count,
            score = plan.stealth_score(),
            "mix session created"
        );
        Ok((session, keys))
    }

    /// Commit every hop's recovery record, all-or-nothing, then allow
    /// execution. Must receive exactly one encrypted secret per hop.
    pub fn save_all_backups(
        &self,
        session_id: &Uuid,
        encrypted_secrets: Vec<EncryptedSecret>,
    ) -> Result<MixSession, MixError> {
        let (mut session, version) = self.sessions.load(session_id)?;
        if session.status != SessionStatus::AwaitingBackup {
            return Err(MixError::InvalidTransition(format!(
                "save_all_backups on session {session_id} in {:?}",
                session.status
            )));
        }
        if encrypted_secrets.len() != session.hop_count() {
            return Err(MixError::BackupIncomplete(format!(
                "session {session_id} needs {} backups, got {}",
                session.hop_count(),
                encrypted_secrets.len()
            )));
        }

        let now = unix_time_secs();
        let records: Vec<HopRecoveryRecord> = session
            .hop_plan
            .iter()
            .zip(encrypted_secrets)
            .enumerate()
            .map(|(hop_index, (hop, encrypted_secret))| HopRecoveryRecord {
                session_id: *session_id,
                hop_index: hop_index as u32,
                address: hop.address.clone(),
                encrypted_secret,
                created_at: now,
                expires_at: now + self.config.backup_ttl_secs,
                swept: false,
                sweep_tx: None,
            })
            .collect();
        self.recovery.record_backups(&records)?;

        session.transition(SessionStatus::Executing, now)?;
        self.sessions.save(&session, version)?;
        info!(session = %session_id, backups = records.len(), "hop backups committed");
        Ok(session)
    }

    /// Submit the transfer for the session's current hop.
    ///
    /// Idempotent per hop: a hop that already has a ledger reference
    /// returns it instead of resubmitting. Refuses to touch the ledger
    /// without a durably committed recovery record for the hop.
    pub async fn submit_hop(&self, session_id: &Uuid, hop_index: u32) -> Result<TxRef, MixError> {
        let (session, _) = self.sessions.load(session_id)?;
        if session.status != SessionStatus::Executing {
            return Err(MixError::InvalidTransition(format!(
                "submit_hop on session {session_id} in {:?}",
                session.status
            )));
        }
        if hop_index != session.current_hop_index || hop_index as usize >= session.hop_count() {
            return Err(MixError::InvalidTransition(format!(
                "session {session_id} is at hop {} of {}, cannot submit hop {hop_index}",
                session.current_hop_index,
                session.hop_count()
            )));
        }
        if let Some(existing) = session
            .hop_refs
            .get(hop_index as usize)
            .and_then(|r| r.clone())
        {
            return Ok(existing);
        }

        if !self.recovery.backup_exists(session_id, hop_index)? {
            return Err(MixError::BackupIncomplete(format!(
                "no recovery record for session {session_id} hop {hop_index}"
            )));
        }

        let hop = &session.hop_plan[hop_index as usize];
        let to = session
            .hop_plan
            .get(hop_index as usize + 1)
            .map(|next| next.address.clone())
            .unwrap_or_else(|| session.destination.clone());
        let tx_ref = self
            .ledger
            .submit_transfer(&hop.address, &to, hop.amount)
            .await
            .map_err(|err| MixError::Ledger(err.to_string()))?;
        info!(session = %session_id, hop = hop_index, tx = %tx_ref, "hop transfer submitted");

        // Record the reference under the latest version; a broadcast
        // transfer must never be forgotten because of a write race.
        loop {
            let (mut session, version) = self.sessions.load(session_id)?;
            match session.hop_refs.get(hop_index as usize) {
                Some(Some(existing)) => {
                    if *existing != tx_ref {
                        warn!(
                            session = %session_id,
                            hop = hop_index,
                            ours = %tx_ref,
                            theirs = %existing,
                            "concurrent submission recorded a different transfer"
                        );
                    }
                    return Ok(existing.clone());
                }
                Some(None) => {
                    session.hop_refs[hop_index as usize] = Some(tx_ref.clone());
                    session.updated_at = unix_time_secs();
                    match self.sessions.save(&session, version) {
                        Ok(_) => return Ok(tx_ref),
                        Err(MixError::Conflict(_)) => continue,
                        Err(err) => return Err(err),
                    }
                }
                None => {
                    return Err(MixError::InvalidTransition(format!(
                        "hop {hop_index} out of range for session {session_id}"
                    )))
                }
            }
        }
    }

    /// Record that a hop confirmed and advance the cursor.
    ///
    /// The ledger is consulted directly: a checkpoint claimed for an
    /// unconfirmed transfer is rejected, not accepted on trust.
    pub async fn checkpoint(
        &self,
        session_id: &Uuid,
        hop_index: u32,
        tx_ref: &TxRef,
    ) -> Result<MixSession, MixError> {
        let (mut session, version) = self.sessions.load(session_id)?;
        if session.status != SessionStatus::Executing {
            return Err(MixError::InvalidTransition(format!(
                "checkpoint on session {session_id} in {:?}",
                session.status
            )));
        }
        if hop_index != session.current_hop_index || hop_index as usize >= session.hop_count() {
            return Err(MixError::InvalidTransition(format!(
                "session {session_id} is at hop {} of {}, cannot checkpoint hop {hop_index}",
                session.current_hop_index,
                session.hop_count()
            )));
        }

        let status = self
            .ledger
            .get_status(tx_ref)
            .await
            .map_err(|err| MixError::Ledger(err.to_string()))?;
        match status {
            TransferStatus::Confirmed => {}
            TransferStatus::Unconfirmed => {
                return Err(MixError::LedgerUnconfirmed(tx_ref.to_string()))
            }
            TransferStatus::Rejected => return Err(MixError::LedgerRejected(tx_ref.to_string())),
        }

        session.hop_refs[hop_index as usize] = Some(tx_ref.clone());
        session.current_hop_index = hop_index + 1;
        session.updated_at = unix_time_secs();
        self.sessions.save(&session, version)?;
        info!(session = %session_id, hop = hop_index, tx = %tx_ref, "hop confirmed");
        Ok(session)
    }

    /// Close out a session whose every hop has confirmed. Fees were
    /// withheld at the final hop: the destination received exactly the
    /// net amount.
    pub fn complete(&self, session_id: &Uuid) -> Result<MixSession, MixError> {
        let (mut session, version) = self.sessions.load(session_id)?;
        if session.current_hop_index as usize != session.hop_count() {
            return Err(MixError::InvalidTransition(format!(
                "session {session_id} has confirmed {} of {} hops",
                session.current_hop_index,
                session.hop_count()
            )));
        }
        session.transition(SessionStatus::Completed, unix_time_secs())?;
        self.sessions.save(&session, version)?;
        info!(
            session = %session_id,
            net = session.net_amount,
            platform_fee = session.platform_fee,
            referral_fee = session.referral_fee,
            "mix session completed"
        );
        Ok(session)
    }

    /// Mark a session failed. Recovery records are untouched — they are
    /// the path back to any stranded funds. Already-broadcast transfers
    /// still land; the sweep scheduler reconciles them.
    pub fn fail(&self, session_id: &Uuid, reason: &str) -> Result<MixSession, MixError> {
        let (mut session, version) = self.sessions.load(session_id)?;
        session.transition(SessionStatus::Failed, unix_time_secs())?;
        session.failure_reason = Some(reason.to_string());
        self.sessions.save(&session, version)?;
        warn!(session = %session_id, reason, "mix session failed");
        Ok(session)
    }

    pub fn session(&self, session_id: &Uuid) -> Result<MixSession, MixError> {
        Ok(self.sessions.load(session_id)?.0)
    }

    /// Poll the ledger until `tx_ref` confirms or the bounded wait ends.
    /// Timing out yields `LedgerUnconfirmed` — the transfer may still
    /// confirm later, so the caller retries rather than assuming failure.
    pub async fn await_confirmation(&self, tx_ref: &TxRef) -> Result<(), MixError> {
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

    /// Drive an `Executing` session to a terminal state: per hop, observe
    /// the privacy delay, submit, await confirmation, checkpoint. Bounded
    /// retries per hop; exhaustion fails the session rather than leaving
    /// it `Executing` forever.
    pub async fn run_session(&self, session_id: &Uuid) -> Result<MixSession, MixError> {
        loop {
            let (session, _) = self.sessions.load(session_id)?;
            match session.status {
                SessionStatus::Executing => {}
                SessionStatus::Completed => return Ok(session),
                other => {
                    return Err(MixError::InvalidTransition(format!(
                        "run_session on session {session_id} in {other:?}"
                    )))
                }
            }
            let hop_index = session.current_hop_index;
            if hop_index as usize == session.hop_count() {
                return self.complete(session_id);
            }

            let delay = session.hop_plan[hop_index as usize].delay_secs;
            if delay > 0 {
                sleep(Duration::from_secs(delay)).await;
            }

            let mut confirmed = false;
            for attempt in 1..=self.config.max_hop_attempts {
                match self.try_hop(session_id, hop_index).await {
                    Ok(()) => {
                        confirmed = true;
                        break;
                    }
                    Err(err) if err.is_retryable() => {
                        warn!(
                            session = %session_id,
                            hop = hop_index,
                            attempt,
                            code = err.error_code(),
                            "hop attempt failed, backing off"
                        );
                        sleep(self.config.retry_backoff * 2u32.saturating_pow(attempt - 1)).await;
                    }
                    Err(err) => {
                        self.fail(session_id, &err.to_string())?;
                        return Err(err);
                    }
                }
            }
            if !confirmed {
                let reason = format!(
                    "hop {hop_index} unconfirmed after {} attempts",
                    self.config.max_hop_attempts
                );
                self.fail(session_id, &reason)?;
                return Err(MixError::RetriesExhausted(reason));
            }
        }
    }

    async fn try_hop(&self, session_id: &Uuid, hop_index: u32) -> Result<(), MixError> {
        let tx_ref = self.submit_hop(session_id, hop_index).await?;
        match self.await_confirmation(&tx_ref).await {
            Ok(()) => {
                self.checkpoint(session_id, hop_index, &tx_ref).await?;
                Ok(())
            }
            Err(MixError::LedgerRejected(msg)) => {
                // A rejected transfer will never confirm; drop its
                // reference so the retry resubmits with the same hop
                // parameters.
                self.clear_hop_ref(session_id, hop_index)?;
                Err(MixError::LedgerRejected(msg))
            }
            Err(err) => Err(err),
        }
    }

    fn clear_hop_ref(&self, session_id: &Uuid, hop_index: u32) -> Result<(), MixError> {
        let (mut session, version) = self.sessions.load(session_id)?;
        if let Some(slot) = session.hop_refs.get_mut(hop_index as usize) {
            *slot = None;
            session.updated_at = unix_time_secs();
            self.sessions.save(&session, version)?;
        }
        Ok(())
    }
}
