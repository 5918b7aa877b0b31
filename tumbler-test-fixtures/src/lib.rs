//! Deterministic port implementations shared across the workspace's tests:
//! a scriptable in-memory ledger, a proof backend whose proofs are plain
//! digests of the public signals, and a fixed-key cipher.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tumbler_common::{
    AeadCipher, Address, Amount, CircuitInputs, Hash32, LedgerClient, ProofBackend, ProofBundle,
    PublicSignals, TransferStatus, TxRef,
};

/// Fixed-key AES-GCM cipher for tests.
pub fn test_cipher() -> AeadCipher {
    AeadCipher::new(&[0x11; 32])
}

pub fn addr(s: &str) -> Address {
    Address::new(s)
}

/// One submitted transfer as the mock ledger saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRecord {
    pub tx_ref: TxRef,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, Amount>,
    statuses: HashMap<TxRef, TransferStatus>,
    transfers: Vec<TransferRecord>,
    fail_submits: u32,
    next_id: u64,
}

/// Scriptable in-memory ledger.
///
/// In auto-confirm mode every submission confirms immediately; in manual
/// mode submissions stay `Unconfirmed` until `confirm`/`reject` is called,
/// which is how tests exercise polling and retry paths.
pub struct MockLedger {
    state: Mutex<LedgerState>,
    auto_confirm: bool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            auto_confirm: true,
        }
    }

    pub fn manual() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            auto_confirm: false,
        }
    }

    pub fn fund(&self, address: &Address, amount: Amount) {
        let mut state = self.state.lock().expect("mock ledger poisoned");
        *state.balances.entry(address.clone()).or_insert(0) += amount;
    }

    /// Make the next `n` submissions fail with a transport error.
    pub fn fail_next_submits(&self, n: u32) {
        self.state.lock().expect("mock ledger poisoned").fail_submits = n;
    }

    pub fn confirm(&self, tx_ref: &TxRef) {
        let mut state = self.state.lock().expect("mock ledger poisoned");
        apply_transfer(&mut state, tx_ref);
        state.statuses.insert(tx_ref.clone(), TransferStatus::Confirmed);
    }

    pub fn reject(&self, tx_ref: &TxRef) {
        let mut state = self.state.lock().expect("mock ledger poisoned");
        state.statuses.insert(tx_ref.clone(), TransferStatus::Rejected);
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state
            .lock()
            .expect("mock ledger poisoned")
            .transfers
            .clone()
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.state
            .lock()
            .expect("mock ledger poisoned")
            .balances
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_transfer(state: &mut LedgerState, tx_ref: &TxRef) {
    // Balance movement happens once, at confirmation time.
    if state.statuses.get(tx_ref) == Some(&TransferStatus::Confirmed) {
        return;
    }
    if let Some(record) = state
        .transfers
        .iter()
        .find(|record| record.tx_ref == *tx_ref)
        .cloned()
    {
        let from_balance = state.balances.entry(record.from.clone()).or_insert(0);
        *from_balance = from_balance.saturating_sub(record.amount);
        *state.balances.entry(record.to.clone()).or_insert(0) += record.amount;
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> anyhow::Result<TxRef> {
        let mut state = self.state.lock().expect("mock ledger poisoned");
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            bail!("ledger unavailable");
        }
        state.next_id += 1;
        let tx_ref = TxRef::new(format!("tx-{}", state.next_id));
        state.transfers.push(TransferRecord {
            tx_ref: tx_ref.clone(),
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        state
            .statuses
            .insert(tx_ref.clone(), TransferStatus::Unconfirmed);
        if self.auto_confirm {
            apply_transfer(&mut state, &tx_ref);
            state
                .statuses
                .insert(tx_ref.clone(), TransferStatus::Confirmed);
        }
        Ok(tx_ref)
    }

    async fn get_status(&self, tx_ref: &TxRef) -> anyhow::Result<TransferStatus> {
        self.state
            .lock()
            .expect("mock ledger poisoned")
            .statuses
            .get(tx_ref)
            .copied()
            .ok_or_else(|| anyhow!("unknown transfer {tx_ref}"))
    }

    async fn get_balance(&self, address: &Address) -> anyhow::Result<Amount> {
        Ok(self.balance_of(address))
    }
}

/// Proof backend whose proofs are digests of the public signals.
///
/// Structurally faithful: a proof only verifies against the exact signals
/// it was produced for. `set_reject` forces verification failures and
/// `set_delay` simulates a slow prover for timeout tests.
pub struct MockProofBackend {
    reject: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockProofBackend {
    pub fn new() -> Self {
        Self {
            reject: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().expect("mock prover poisoned") = delay;
    }

    pub fn proof_for(signals: &PublicSignals) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tumbler.test-proof.v1");
        hasher.update(&signals.to_bytes());
        hasher.finalize().as_bytes().to_vec()
    }
}

impl Default for MockProofBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProofBackend for MockProofBackend {
    async fn prove(&self, inputs: &CircuitInputs) -> anyhow::Result<ProofBundle> {
        Ok(ProofBundle {
            proof: Self::proof_for(&inputs.public),
            public_signals: inputs.public.clone(),
        })
    }

    async fn verify(&self, proof: &[u8], signals: &PublicSignals) -> anyhow::Result<bool> {
        let delay = *self.delay.lock().expect("mock prover poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(proof == Self::proof_for(signals))
    }
}

/// A deposit's client-side material: the secret plus derived hashes.
pub struct DepositFixture {
    pub secret: Hash32,
    pub commitment: Hash32,
}

/// Deterministic deposit material for test index `n`.
pub fn deposit_fixture(n: u8, amount: Amount, tier: u8) -> DepositFixture {
    let secret = Hash32::from([n; 32]);
    DepositFixture {
        secret,
        commitment: tumbler_common::commitment_hash(&secret, amount, tier),
    }
}
