use std::{sync::Arc, time::Duration};

use tumbler_common::{unix_time_secs, EncryptedSecret, RecordStore, SecretCipher, UNIT};
use tumbler_core::{
    HopKeyMaterial, HopRecoveryRecord, MixOrchestrator, MixRequest, OrchestratorConfig,
    PrivacyProfile, RecoveryLedger, SessionRepo, SweepConfig, SweepOutcome, SweepScheduler,
};
use tumbler_test_fixtures::{addr, test_cipher, MockLedger};
use uuid::Uuid;

const NETWORK_FEE: u64 = 10_000;

struct Harness {
    orchestrator: MixOrchestrator,
    recovery: RecoveryLedger,
    scheduler: SweepScheduler,
    ledger: Arc<MockLedger>,
}

fn harness(ledger: Arc<MockLedger>) -> Harness {
    let store = RecordStore::in_memory();
    let sessions = SessionRepo::new(store.clone());
    let recovery = RecoveryLedger::new(store, sessions.clone()).with_stall_threshold(60);
    let orchestrator =
        MixOrchestrator::new(sessions, recovery.clone(), ledger.clone());
    let scheduler = SweepScheduler::new(
        recovery.clone(),
        ledger.clone(),
        Arc::new(test_cipher()),
        SweepConfig {
            network_fee: NETWORK_FEE,
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            confirm_poll_interval: Duration::from_millis(5),
            confirm_timeout: Duration::from_millis(100),
            ..SweepConfig::new(addr("recovery-vault"))
        },
    );
    Harness {
        orchestrator,
        recovery,
        scheduler,
        ledger,
    }
}

fn encrypt_keys(keys: &[HopKeyMaterial]) -> Vec<EncryptedSecret> {
    let cipher = test_cipher();
    keys.iter()
        .map(|key| cipher.encrypt(key.secret.as_ref()).unwrap())
        .collect()
}

fn request(gross: u64) -> MixRequest {
    MixRequest {
        gross_amount: gross,
        destination: addr("dest-main"),
        profile: PrivacyProfile::Fast,
        referral: None,
    }
}

/// Crash recovery: a funded hop whose session stalled mid-execution is
/// found by the scheduler and its balance moved to the recovery vault.
#[tokio::test]
async fn stalled_session_funds_are_swept() {
    let h = harness(Arc::new(MockLedger::new()));
    let gross = UNIT;

    let (session, keys) = h.orchestrator.create(request(gross)).unwrap();
    h.orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    // The user funded hop 0 and the first transfer went out, but the
    // process died before the checkpoint landed.
    let hop0 = session.hop_plan[0].address.clone();
    h.ledger.fund(&hop0, gross);
    h.orchestrator.submit_hop(&session.id, 0).await.unwrap();

    // Well past the stall threshold, both hop addresses hold residue.
    let resolved = h.scheduler.run_once(unix_time_secs() + 3_600).await;
    assert_eq!(resolved, 2);

    for hop in 0..2 {
        let (record, _) = h.recovery.get(&session.id, hop).unwrap().unwrap();
        assert!(record.swept, "hop {hop}");
        assert!(record.sweep_tx.is_some(), "hop {hop}");
    }
    // Everything except two network fees reached the vault.
    assert_eq!(
        h.ledger.balance_of(&addr("recovery-vault")),
        gross - 2 * NETWORK_FEE
    );
    assert_eq!(h.ledger.balance_of(&hop0), 0);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let h = harness(Arc::new(MockLedger::new()));
    let (session, keys) = h.orchestrator.create(request(UNIT)).unwrap();
    h.orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();
    h.ledger.fund(&session.hop_plan[0].address, UNIT);
    h.orchestrator.fail(&session.id, "abandoned").unwrap();

    let now = unix_time_secs() + 10;
    assert!(h.scheduler.run_once(now).await > 0);
    let transfers_after_first = h.ledger.transfers().len();

    // Second pass: nothing listed, nothing moved, no errors.
    assert_eq!(h.scheduler.run_once(now).await, 0);
    assert_eq!(h.ledger.transfers().len(), transfers_after_first);

    // Direct re-sweep of a swept record is a no-op, not an error.
    let outcome = h.scheduler.sweep(&session.id, 0).await.unwrap();
    assert_eq!(outcome, SweepOutcome::AlreadySwept);
}

#[tokio::test]
async fn empty_addresses_are_marked_without_transfers() {
    let h = harness(Arc::new(MockLedger::new()));
    let (session, keys) = h.orchestrator.create(request(UNIT)).unwrap();
    h.orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();
    h.orchestrator.fail(&session.id, "abandoned").unwrap();

    let resolved = h.scheduler.run_once(unix_time_secs() + 10).await;
    assert_eq!(resolved, session.hop_count());
    assert!(h.ledger.transfers().is_empty());
    for hop in 0..session.hop_count() as u32 {
        let (record, _) = h.recovery.get(&session.id, hop).unwrap().unwrap();
        assert!(record.swept);
        assert!(record.sweep_tx.is_none());
    }
}

#[tokio::test]
async fn failed_submissions_leave_the_record_unswept() {
    let h = harness(Arc::new(MockLedger::new()));
    let (session, keys) = h.orchestrator.create(request(UNIT)).unwrap();
    h.orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();
    h.ledger.fund(&session.hop_plan[0].address, UNIT);
    h.orchestrator.fail(&session.id, "abandoned").unwrap();

    // Exhaust the bounded attempts.
    h.ledger.fail_next_submits(2);
    let err = h.scheduler.sweep(&session.id, 0).await.unwrap_err();
    assert_eq!(err.error_code(), "RETRIES_EXHAUSTED");
    let (record, _) = h.recovery.get(&session.id, 0).unwrap().unwrap();
    assert!(!record.swept);

    // The ledger recovered; the next attempt succeeds.
    let outcome = h.scheduler.sweep(&session.id, 0).await.unwrap();
    assert!(matches!(outcome, SweepOutcome::Recovered { .. }));
}

#[tokio::test]
async fn expired_backups_are_sweepable_while_executing() {
    let ledger = Arc::new(MockLedger::new());
    let store = RecordStore::in_memory();
    let sessions = SessionRepo::new(store.clone());
    let recovery = RecoveryLedger::new(store, sessions.clone()).with_stall_threshold(3_600);
    let orchestrator = MixOrchestrator::with_config(
        sessions,
        recovery.clone(),
        ledger.clone(),
        OrchestratorConfig {
            backup_ttl_secs: 0,
            ..OrchestratorConfig::default()
        },
    );

    let (session, keys) = orchestrator.create(request(UNIT)).unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    // Session is healthy and fresh, but the records themselves expired.
    let sweepable = recovery.list_sweepable(unix_time_secs()).unwrap();
    assert_eq!(sweepable.len(), session.hop_count());
}

#[tokio::test]
async fn tampered_backups_abort_the_sweep() {
    let h = harness(Arc::new(MockLedger::new()));
    let session_id = Uuid::new_v4();
    let bogus = addr("not-derived-from-the-secret");
    let cipher = test_cipher();
    h.recovery
        .record_backups(&[HopRecoveryRecord {
            session_id,
            hop_index: 0,
            address: bogus.clone(),
            encrypted_secret: cipher.encrypt(&[9u8; 32]).unwrap(),
            created_at: 0,
            expires_at: 1,
            swept: false,
            sweep_tx: None,
        }])
        .unwrap();
    h.ledger.fund(&bogus, UNIT);

    let err = h.scheduler.sweep(&session_id, 0).await.unwrap_err();
    assert_eq!(err.error_code(), "CORRUPT_BACKUP");
    assert!(!err.is_retryable());

    let (record, _) = h.recovery.get(&session_id, 0).unwrap().unwrap();
    assert!(!record.swept);
    assert!(h.ledger.transfers().is_empty());

    // The scan surfaces the record but never marks it swept.
    assert_eq!(h.scheduler.run_once(unix_time_secs() + 10).await, 0);
}

#[tokio::test]
async fn missing_records_are_reported() {
    let h = harness(Arc::new(MockLedger::new()));
    let err = h.scheduler.sweep(&Uuid::new_v4(), 0).await.unwrap_err();
    assert_eq!(err.error_code(), "RECORD_NOT_FOUND");
}
