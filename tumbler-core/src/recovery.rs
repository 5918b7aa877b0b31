//! Recovery ledger: the durable backup trail for intermediate addresses.
//!
//! One record per planned hop, committed as an all-or-nothing batch before
//! the first transfer is submitted. Records are never deleted; `swept`
//! flips exactly once, through a version-checked write, after the sweep
//! scheduler confirms nothing is left at the address.

use serde::{Deserialize, Serialize};
use tracing::error;
use tumbler_common::{Address, EncryptedSecret, RecordStore, TxRef};
use uuid::Uuid;

use crate::{
    error::MixError,
    session::{SessionRepo, SessionStatus},
};

const RECOVERY_KEY_PREFIX: &[u8] = b"recovery/";

/// Sessions `Executing` with no checkpoint advance for this long are
/// treated as stalled and their hops become sweep-eligible.
pub const DEFAULT_STALL_THRESHOLD_SECS: u64 = 900;

/// Backup of one intermediate address's secret material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HopRecoveryRecord {
    pub session_id: Uuid,
    pub hop_index: u32,
    pub address: Address,
    pub encrypted_secret: EncryptedSecret,
    pub created_at: u64,
    pub expires_at: u64,
    pub swept: bool,
    /// Ledger reference of the sweep transfer, when funds were moved.
    pub sweep_tx: Option<TxRef>,
}

// Fixed-width key: prefix || uuid bytes || big-endian hop index, so a
// session's records scan contiguously in hop order.
fn record_key(session_id: &Uuid, hop_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECOVERY_KEY_PREFIX.len() + 20);
    key.extend_from_slice(RECOVERY_KEY_PREFIX);
    key.extend_from_slice(session_id.as_bytes());
    key.extend_from_slice(&hop_index.to_be_bytes());
    key
}

/// Durable registry of hop backups plus the sweep-eligibility scan.
#[derive(Clone)]
pub struct RecoveryLedger {
    store: RecordStore,
    sessions: SessionRepo,
    stall_threshold_secs: u64,
}

impl RecoveryLedger {
    pub fn new(store: RecordStore, sessions: SessionRepo) -> Self {
        Self {
            store,
            sessions,
            stall_threshold_secs: DEFAULT_STALL_THRESHOLD_SECS,
        }
    }

    pub fn with_stall_threshold(mut self, secs: u64) -> Self {
        self.stall_threshold_secs = secs;
        self
    }

    /// Commit a batch of backups atomically. Retried as a whole batch on
    /// failure, never partially.
    pub fn record_backups(&self, records: &[HopRecoveryRecord]) -> Result<(), MixError> {
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let bytes = serde_json::to_vec(record)
                .map_err(|err| MixError::Store(format!("serialize recovery record: {err}")))?;
            entries.push((record_key(&record.session_id, record.hop_index), bytes));
        }
        self.store.insert_batch(&entries)?;
        Ok(())
    }

    pub fn backup_exists(&self, session_id: &Uuid, hop_index: u32) -> Result<bool, MixError> {
        Ok(self.store.get(&record_key(session_id, hop_index))?.is_some())
    }

    /// A record together with its store version (for `mark_swept`).
    pub fn get(
        &self,
        session_id: &Uuid,
        hop_index: u32,
    ) -> Result<Option<(HopRecoveryRecord, u64)>, MixError> {
        let Some(raw) = self.store.get(&record_key(session_id, hop_index))? else {
            return Ok(None);
        };
        let record: HopRecoveryRecord = serde_json::from_slice(&raw.bytes)
            .map_err(|err| MixError::Store(format!("deserialize recovery record: {err}")))?;
        Ok(Some((record, raw.version)))
    }

    /// All unswept records whose funds may be stranded: past expiry, owned
    /// by a `Failed` session, or owned by a session stalled in `Executing`.
    pub fn list_sweepable(&self, now: u64) -> Result<Vec<HopRecoveryRecord>, MixError> {
        let mut sweepable = Vec::new();
        for (_, raw) in self.store.scan_prefix(RECOVERY_KEY_PREFIX)? {
            let record: HopRecoveryRecord = serde_json::from_slice(&raw.bytes)
                .map_err(|err| MixError::Store(format!("deserialize recovery record: {err}")))?;
            if record.swept {
                continue;
            }
            if record.expires_at <= now {
                sweepable.push(record);
                continue;
            }
            match self.sessions.load(&record.session_id) {
                Ok((session, _)) => {
                    let eligible = match session.status {
                        SessionStatus::Failed => true,
                        SessionStatus::Executing => {
                            now.saturating_sub(session.updated_at) > self.stall_threshold_secs
                        }
                        _ => false,
                    };
                    if eligible {
                        sweepable.push(record);
                    }
                }
                // An orphaned record still becomes sweepable through expiry.
                Err(MixError::SessionNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(sweepable)
    }

    /// Flip `swept` exactly once, against the version read by the caller.
    ///
    /// A concurrent flip means two sweepers raced on the record; that is a
    /// double-sweep attempt and fatal.
    pub fn mark_swept(
        &self,
        session_id: &Uuid,
        hop_index: u32,
        expected_version: u64,
        sweep_tx: Option<TxRef>,
    ) -> Result<(), MixError> {
        let Some((mut record, version)) = self.get(session_id, hop_index)? else {
            return Err(MixError::RecordNotFound(format!(
                "session {session_id} hop {hop_index}"
            )));
        };
        if record.swept {
            let err = MixError::DoubleSweep(format!(
                "record for session {session_id} hop {hop_index} is already swept"
            ));
            error!(code = err.error_code(), "{err}");
            return Err(err);
        }
        if version != expected_version {
            let err = MixError::DoubleSweep(format!(
                "record for session {session_id} hop {hop_index} changed under sweep \
                 (version {version}, expected {expected_version})"
            ));
            error!(code = err.error_code(), "{err}");
            return Err(err);
        }
        record.swept = true;
        record.sweep_tx = sweep_tx;
        let bytes = serde_json::to_vec(&record)
            .map_err(|err| MixError::Store(format!("serialize recovery record: {err}")))?;
        self.store
            .put(&record_key(session_id, hop_index), &bytes, Some(version))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tumbler_common::RecordStore;

    fn sample_record(session_id: Uuid, hop_index: u32, expires_at: u64) -> HopRecoveryRecord {
        HopRecoveryRecord {
            session_id,
            hop_index,
            address: Address::new(format!("hop-{hop_index}")),
            encrypted_secret: EncryptedSecret {
                ciphertext: vec![1, 2, 3],
                nonce: vec![0; 12],
            },
            created_at: 0,
            expires_at,
            swept: false,
            sweep_tx: None,
        }
    }

    fn ledger() -> RecoveryLedger {
        let store = RecordStore::in_memory();
        RecoveryLedger::new(store.clone(), SessionRepo::new(store))
    }

    #[test]
    fn batch_records_are_retrievable_in_hop_order() {
        let ledger = ledger();
        let session_id = Uuid::new_v4();
        let records: Vec<_> = (0..3).map(|i| sample_record(session_id, i, 100)).collect();
        ledger.record_backups(&records).unwrap();
        for i in 0..3 {
            assert!(ledger.backup_exists(&session_id, i).unwrap());
        }
        assert!(!ledger.backup_exists(&session_id, 3).unwrap());
    }

    #[test]
    fn expired_records_become_sweepable() {
        let ledger = ledger();
        let session_id = Uuid::new_v4();
        ledger
            .record_backups(&[sample_record(session_id, 0, 50)])
            .unwrap();
        assert!(ledger.list_sweepable(49).unwrap().is_empty());
        let hits = ledger.list_sweepable(50).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hop_index, 0);
    }

    #[test]
    fn mark_swept_flips_once_and_only_once() {
        let ledger = ledger();
        let session_id = Uuid::new_v4();
        ledger
            .record_backups(&[sample_record(session_id, 0, 50)])
            .unwrap();
        let (_, version) = ledger.get(&session_id, 0).unwrap().unwrap();
        ledger
            .mark_swept(&session_id, 0, version, Some(TxRef::new("tx-9")))
            .unwrap();

        let (record, version) = ledger.get(&session_id, 0).unwrap().unwrap();
        assert!(record.swept);
        assert_eq!(record.sweep_tx, Some(TxRef::new("tx-9")));
        assert!(ledger.list_sweepable(1_000).unwrap().is_empty());

        let err = ledger.mark_swept(&session_id, 0, version, None).unwrap_err();
        assert_eq!(err.error_code(), "DOUBLE_SWEEP");
    }

    #[test]
    fn stale_version_is_a_double_sweep_attempt() {
        let ledger = ledger();
        let session_id = Uuid::new_v4();
        ledger
            .record_backups(&[sample_record(session_id, 0, 50)])
            .unwrap();
        let err = ledger.mark_swept(&session_id, 0, 99, None).unwrap_err();
        assert_eq!(err.error_code(), "DOUBLE_SWEEP");
    }
}
