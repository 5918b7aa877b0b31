//! Mix-session model: a closed status set with an explicit transition
//! table, validated on every mutation, plus the versioned session repo.

use serde::{Deserialize, Serialize};
use tumbler_common::{Address, Amount, RecordStore, TxRef};
use uuid::Uuid;

use crate::{error::MixError, planner::PrivacyProfile};

const SESSION_KEY_PREFIX: &[u8] = b"session/";

/// Session lifecycle state. Transitions are monotonic; `Completed` and
/// `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    AwaitingBackup,
    Executing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// The transition table. Anything not listed here is rejected.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::AwaitingBackup)
                | (SessionStatus::AwaitingBackup, SessionStatus::Executing)
                | (SessionStatus::AwaitingBackup, SessionStatus::Failed)
                | (SessionStatus::Executing, SessionStatus::Completed)
                | (SessionStatus::Executing, SessionStatus::Failed)
        )
    }
}

/// One hop of a persisted plan: the generated intermediate address plus
/// the planner's amount and delay for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedHop {
    pub address: Address,
    pub amount: Amount,
    pub delay_secs: u64,
}

/// One mixing request, retained indefinitely for audit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MixSession {
    pub id: Uuid,
    pub gross_amount: Amount,
    pub destination: Address,
    pub referral: Option<Address>,
    pub profile: PrivacyProfile,
    pub status: SessionStatus,
    /// Immutable once persisted.
    pub hop_plan: Vec<PlannedHop>,
    /// Ledger reference per submitted hop, recorded at submission time.
    pub hop_refs: Vec<Option<TxRef>>,
    /// Next hop to submit; equals `hop_plan.len()` when all hops confirmed.
    pub current_hop_index: u32,
    pub net_amount: Amount,
    pub platform_fee: Amount,
    pub referral_fee: Amount,
    pub created_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
    pub failure_reason: Option<String>,
}

impl MixSession {
    pub fn hop_count(&self) -> usize {
        self.hop_plan.len()
    }

    /// Apply a status change, rejecting anything outside the table.
    pub fn transition(&mut self, next: SessionStatus, now: u64) -> Result<(), MixError> {
        if !self.status.can_transition(next) {
            return Err(MixError::InvalidTransition(format!(
                "{:?} -> {:?} for session {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        self.updated_at = now;
        if next == SessionStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

fn session_key(id: &Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(SESSION_KEY_PREFIX.len() + 16);
    key.extend_from_slice(SESSION_KEY_PREFIX);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Versioned session storage over the record store.
#[derive(Clone)]
pub struct SessionRepo {
    store: RecordStore,
}

impl SessionRepo {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Persist a fresh session; fails if the id already exists.
    pub fn create(&self, session: &MixSession) -> Result<u64, MixError> {
        let bytes = serde_json::to_vec(session)
            .map_err(|err| MixError::Store(format!("serialize session: {err}")))?;
        Ok(self.store.put(&session_key(&session.id), &bytes, Some(0))?)
    }

    /// Conditional write against the version read earlier.
    pub fn save(&self, session: &MixSession, expected_version: u64) -> Result<u64, MixError> {
        let bytes = serde_json::to_vec(session)
            .map_err(|err| MixError::Store(format!("serialize session: {err}")))?;
        Ok(self
            .store
            .put(&session_key(&session.id), &bytes, Some(expected_version))?)
    }

    pub fn load(&self, id: &Uuid) -> Result<(MixSession, u64), MixError> {
        let record = self
            .store
            .get(&session_key(id))?
            .ok_or(MixError::SessionNotFound(*id))?;
        let session: MixSession = serde_json::from_slice(&record.bytes)
            .map_err(|err| MixError::Store(format!("deserialize session {id}: {err}")))?;
        Ok((session, record.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tumbler_common::UNIT;

    fn sample_session(status: SessionStatus) -> MixSession {
        MixSession {
            id: Uuid::new_v4(),
            gross_amount: UNIT,
            destination: Address::new("dest"),
            referral: None,
            profile: PrivacyProfile::Fast,
            status,
            hop_plan: vec![],
            hop_refs: vec![],
            current_hop_index: 0,
            net_amount: UNIT,
            platform_fee: 0,
            referral_fee: 0,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
            failure_reason: None,
        }
    }

    #[test]
    fn legal_transitions_follow_the_table() {
        let mut session = sample_session(SessionStatus::Pending);
        session.transition(SessionStatus::AwaitingBackup, 1).unwrap();
        session.transition(SessionStatus::Executing, 2).unwrap();
        session.transition(SessionStatus::Completed, 3).unwrap();
        assert_eq!(session.completed_at, Some(3));
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        for terminal in [SessionStatus::Completed, SessionStatus::Failed] {
            for next in [
                SessionStatus::Pending,
                SessionStatus::AwaitingBackup,
                SessionStatus::Executing,
                SessionStatus::Completed,
                SessionStatus::Failed,
            ] {
                assert!(!terminal.can_transition(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn skipping_backup_is_rejected() {
        let mut session = sample_session(SessionStatus::Pending);
        let err = session
            .transition(SessionStatus::Executing, 1)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[test]
    fn pending_sessions_cannot_fail_directly() {
        // Failure is only reachable once backups are in play.
        assert!(!SessionStatus::Pending.can_transition(SessionStatus::Failed));
    }

    #[test]
    fn repo_round_trips_sessions_with_versions() {
        let repo = SessionRepo::new(RecordStore::in_memory());
        let session = sample_session(SessionStatus::Pending);
        let v1 = repo.create(&session).unwrap();
        assert_eq!(v1, 1);

        let (mut loaded, version) = repo.load(&session.id).unwrap();
        loaded.transition(SessionStatus::AwaitingBackup, 5).unwrap();
        repo.save(&loaded, version).unwrap();

        // A stale writer must lose.
        let err = repo.save(&loaded, version).unwrap_err();
        assert_eq!(err.error_code(), "CONCURRENT_UPDATE");
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let repo = SessionRepo::new(RecordStore::in_memory());
        let session = sample_session(SessionStatus::Pending);
        repo.create(&session).unwrap();
        assert!(repo.create(&session).is_err());
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&SessionStatus::AwaitingBackup).unwrap();
        assert_eq!(json, "\"AWAITING_BACKUP\"");
    }
}
