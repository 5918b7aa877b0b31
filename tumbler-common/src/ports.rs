//! Port traits for the external collaborators the core consumes.
//!
//! The ledger and the proving system are externally supplied; the core only
//! depends on these contracts. Test fixtures provide deterministic
//! implementations, production wiring supplies real ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, Hash32, TxRef};

/// Confirmation state of a submitted transfer.
///
/// `Unconfirmed` is not a failure: ledger transfers can confirm late, so
/// callers retry polling rather than assuming the transfer was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Unconfirmed,
    Confirmed,
    Rejected,
}

/// Submits transfers and answers balance/status queries against the ledger.
///
/// Implementations own signing and the wire format. Transfers are final
/// once broadcast; there is no cancel.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> anyhow::Result<TxRef>;

    async fn get_status(&self, tx_ref: &TxRef) -> anyhow::Result<TransferStatus>;

    async fn get_balance(&self, address: &Address) -> anyhow::Result<Amount>;
}

/// Public signals accompanying a withdrawal proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSignals {
    /// Claimed Merkle root the membership proof was generated against.
    pub root: Hash32,
    /// Nullifier hash revealed by the withdrawal.
    pub nullifier_hash: Hash32,
    /// Destination of the withdrawn funds.
    pub recipient: Address,
    /// Fee paid to the withdrawal relayer, in smallest units.
    pub relay_fee: Amount,
    /// Denomination tier of the deposit being withdrawn.
    pub tier: u8,
}

impl PublicSignals {
    /// Canonical byte encoding, used by deterministic test backends.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96 + self.recipient.as_str().len());
        buf.extend_from_slice(self.root.as_bytes());
        buf.extend_from_slice(self.nullifier_hash.as_bytes());
        buf.extend_from_slice(self.recipient.as_str().as_bytes());
        buf.extend_from_slice(&self.relay_fee.to_be_bytes());
        buf.push(self.tier);
        buf
    }
}

/// Private + public inputs handed to the prover.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitInputs {
    /// Deposit secret (private).
    pub secret: Hash32,
    /// Leaf index of the commitment in the tree (private).
    pub leaf_index: u64,
    /// Sibling path from the leaf to the claimed root (private).
    pub merkle_path: Vec<Hash32>,
    /// Public signals the proof will be checked against.
    pub public: PublicSignals,
}

/// A proof together with the signals it binds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofBundle {
    pub proof: Vec<u8>,
    pub public_signals: PublicSignals,
}

/// Black-box proving system: generates and verifies membership proofs.
#[async_trait]
pub trait ProofBackend: Send + Sync {
    async fn prove(&self, inputs: &CircuitInputs) -> anyhow::Result<ProofBundle>;

    async fn verify(&self, proof: &[u8], signals: &PublicSignals) -> anyhow::Result<bool>;
}
