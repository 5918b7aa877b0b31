use std::{sync::Arc, time::Duration};

use tumbler_common::{
    EncryptedSecret, RecordStore, SecretCipher, UNIT,
};
use tumbler_core::{
    HopKeyMaterial, MixOrchestrator, MixRequest, OrchestratorConfig, PrivacyProfile,
    RecoveryLedger, SessionRepo, SessionStatus,
};
use tumbler_test_fixtures::{addr, test_cipher, MockLedger};
use uuid::Uuid;

fn setup(ledger: Arc<MockLedger>) -> (MixOrchestrator, RecoveryLedger, SessionRepo) {
    let store = RecordStore::in_memory();
    let sessions = SessionRepo::new(store.clone());
    let recovery = RecoveryLedger::new(store, sessions.clone());
    let orchestrator = MixOrchestrator::new(sessions.clone(), recovery.clone(), ledger);
    (orchestrator, recovery, sessions)
}

fn request(gross: u64, profile: PrivacyProfile) -> MixRequest {
    MixRequest {
        gross_amount: gross,
        destination: addr("dest-main"),
        profile,
        referral: None,
    }
}

fn encrypt_keys(keys: &[HopKeyMaterial]) -> Vec<EncryptedSecret> {
    let cipher = test_cipher();
    keys.iter()
        .map(|key| cipher.encrypt(key.secret.as_ref()).unwrap())
        .collect()
}

#[tokio::test]
async fn full_lifecycle_deducts_fees_at_final_hop() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger.clone());

    let gross = 5 * UNIT;
    let (session, keys) = orchestrator
        .create(request(gross, PrivacyProfile::Default))
        .unwrap();
    assert_eq!(session.status, SessionStatus::AwaitingBackup);
    assert_eq!(session.platform_fee, gross * 2 / 100);
    assert_eq!(session.referral_fee, 0);

    let session = orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();
    assert_eq!(session.status, SessionStatus::Executing);

    for hop in 0..session.hop_count() as u32 {
        let tx_ref = orchestrator.submit_hop(&session.id, hop).await.unwrap();
        orchestrator
            .checkpoint(&session.id, hop, &tx_ref)
            .await
            .unwrap();
    }

    let session = orchestrator.complete(&session.id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.completed_at.is_some());

    // The final transfer carried exactly the net amount to the
    // destination; fees stayed behind at the last hop.
    let transfers = ledger.transfers();
    let last = transfers.last().unwrap();
    assert_eq!(last.to, addr("dest-main"));
    assert_eq!(last.amount, session.net_amount);
    assert_eq!(
        session.net_amount + session.platform_fee + session.referral_fee,
        gross
    );
    assert_eq!(ledger.balance_of(&addr("dest-main")), session.net_amount);
}

#[tokio::test]
async fn wrong_backup_count_is_incomplete() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger);

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    let mut partial = encrypt_keys(&keys);
    partial.pop();

    let err = orchestrator
        .save_all_backups(&session.id, partial)
        .unwrap_err();
    assert_eq!(err.error_code(), "BACKUP_INCOMPLETE");

    // Nothing moved to Executing.
    let session = orchestrator.session(&session.id).unwrap();
    assert_eq!(session.status, SessionStatus::AwaitingBackup);
}

#[tokio::test]
async fn submit_refuses_without_committed_backup() {
    let ledger = Arc::new(MockLedger::new());
    let store = RecordStore::in_memory();
    let sessions = SessionRepo::new(store.clone());
    let recovery = RecoveryLedger::new(store, sessions.clone());
    let orchestrator =
        MixOrchestrator::new(sessions.clone(), recovery, ledger.clone());

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    // Same session store, but a recovery ledger that never saw the
    // backups: the per-hop guard must hold even with the session in
    // Executing.
    let blind = MixOrchestrator::new(
        sessions,
        RecoveryLedger::new(RecordStore::in_memory(), SessionRepo::new(RecordStore::in_memory())),
        ledger.clone(),
    );
    let err = blind.submit_hop(&session.id, 0).await.unwrap_err();
    assert_eq!(err.error_code(), "BACKUP_INCOMPLETE");
    assert!(ledger.transfers().is_empty());
}

#[tokio::test]
async fn submitting_before_backups_is_an_invalid_transition() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger.clone());

    let (session, _keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    let err = orchestrator.submit_hop(&session.id, 0).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
    assert!(ledger.transfers().is_empty());
}

#[tokio::test]
async fn checkpoint_rejects_unconfirmed_transfers() {
    let ledger = Arc::new(MockLedger::manual());
    let (orchestrator, _, _) = setup(ledger.clone());

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    let tx_ref = orchestrator.submit_hop(&session.id, 0).await.unwrap();
    let err = orchestrator
        .checkpoint(&session.id, 0, &tx_ref)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "LEDGER_UNCONFIRMED");
    assert_eq!(orchestrator.session(&session.id).unwrap().current_hop_index, 0);

    ledger.confirm(&tx_ref);
    let session = orchestrator.checkpoint(&session.id, 0, &tx_ref).await.unwrap();
    assert_eq!(session.current_hop_index, 1);
}

#[tokio::test]
async fn submit_is_idempotent_per_hop() {
    let ledger = Arc::new(MockLedger::manual());
    let (orchestrator, _, _) = setup(ledger.clone());

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    let first = orchestrator.submit_hop(&session.id, 0).await.unwrap();
    let second = orchestrator.submit_hop(&session.id, 0).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(ledger.transfers().len(), 1);
}

#[tokio::test]
async fn out_of_order_hops_are_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger);

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    let err = orchestrator.submit_hop(&session.id, 1).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn completing_early_is_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger);

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    let err = orchestrator.complete(&session.id).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");

    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();
    let err = orchestrator.complete(&session.id).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn failing_keeps_recovery_records() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, recovery, _) = setup(ledger.clone());

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    let failed = orchestrator.fail(&session.id, "operator cancel").unwrap();
    assert_eq!(failed.status, SessionStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("operator cancel"));

    // No further hops are submitted...
    let err = orchestrator.submit_hop(&session.id, 0).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
    assert!(ledger.transfers().is_empty());

    // ...but every backup survives and is now sweep-eligible.
    for hop in 0..failed.hop_count() as u32 {
        assert!(recovery.backup_exists(&session.id, hop).unwrap());
    }
    let sweepable = recovery.list_sweepable(failed.updated_at).unwrap();
    assert_eq!(sweepable.len(), failed.hop_count());
}

#[tokio::test]
async fn terminal_sessions_cannot_fail_again() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger);

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();
    orchestrator.fail(&session.id, "first").unwrap();

    let err = orchestrator.fail(&session.id, "second").unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
    let session = orchestrator.session(&session.id).unwrap();
    assert_eq!(session.failure_reason.as_deref(), Some("first"));
}

#[tokio::test]
async fn unknown_sessions_are_reported() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger);
    let err = orchestrator.session(&Uuid::new_v4()).unwrap_err();
    assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn run_session_drives_to_completion() {
    let ledger = Arc::new(MockLedger::new());
    let (orchestrator, _, _) = setup(ledger.clone());

    let (session, keys) = orchestrator
        .create(request(10 * UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    let completed = orchestrator.run_session(&session.id).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert_eq!(
        ledger.balance_of(&addr("dest-main")),
        completed.net_amount
    );
}

#[tokio::test]
async fn run_session_fails_after_exhausting_confirmation_retries() {
    let ledger = Arc::new(MockLedger::manual());
    let store = RecordStore::in_memory();
    let sessions = SessionRepo::new(store.clone());
    let recovery = RecoveryLedger::new(store, sessions.clone());
    let orchestrator = MixOrchestrator::with_config(
        sessions,
        recovery.clone(),
        ledger.clone(),
        OrchestratorConfig {
            confirm_poll_interval: Duration::from_millis(5),
            confirm_timeout: Duration::from_millis(20),
            max_hop_attempts: 2,
            retry_backoff: Duration::from_millis(5),
            ..OrchestratorConfig::default()
        },
    );

    let (session, keys) = orchestrator
        .create(request(UNIT, PrivacyProfile::Fast))
        .unwrap();
    orchestrator
        .save_all_backups(&session.id, encrypt_keys(&keys))
        .unwrap();

    // Nothing ever confirms; the driver must resolve the session rather
    // than leave it Executing forever.
    let err = orchestrator.run_session(&session.id).await.unwrap_err();
    assert_eq!(err.error_code(), "RETRIES_EXHAUSTED");

    let session = orchestrator.session(&session.id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.failure_reason.is_some());
    assert!(recovery.backup_exists(&session.id, 0).unwrap());
}
