//! # tumbler-common
//!
//! Shared domain types and infrastructure for the tumbler workspace:
//! ledger addresses, fixed-point amounts and the denomination table,
//! 32-byte hash values, the port traits the core consumes (ledger client,
//! proof backend, secret cipher), the AES-256-GCM secret cipher, and the
//! versioned record store with in-memory and sled backends.

mod amount;
mod cipher;
mod ports;
mod store;
mod types;

pub use amount::{denomination_for_tier, tier_for_amount, Amount, DENOMINATIONS, MIN_DENOMINATION, UNIT};
pub use cipher::{AeadCipher, CipherError, EncryptedSecret, SecretCipher};
pub use ports::{
    CircuitInputs, LedgerClient, ProofBackend, ProofBundle, PublicSignals, TransferStatus,
};
pub use store::{RecordStore, StoreError, VersionedRecord};
pub use types::{Address, Hash32, TxRef};

use std::time::{SystemTime, UNIX_EPOCH};

/// Hash arbitrary bytes down to a 32-byte digest.
pub fn blake3_32(input: &[u8]) -> [u8; 32] {
    let hash = blake3::hash(input);
    *hash.as_bytes()
}

/// Domain-separated commitment hash binding a deposit secret to its
/// amount and denomination tier.
pub fn commitment_hash(secret: &Hash32, amount: Amount, tier: u8) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tumbler.commitment.v1");
    hasher.update(secret.as_bytes());
    hasher.update(&amount.to_be_bytes());
    hasher.update(&[tier]);
    Hash32::from(*hasher.finalize().as_bytes())
}

/// Domain-separated nullifier hash for a deposit at a given leaf index.
///
/// Revealing the nullifier does not reveal which commitment it came from;
/// the binding to the leaf lives only inside the proof.
pub fn nullifier_hash(secret: &Hash32, leaf_index: u64) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tumbler.nullifier.v1");
    hasher.update(secret.as_bytes());
    hasher.update(&leaf_index.to_be_bytes());
    Hash32::from(*hasher.finalize().as_bytes())
}

/// Current unix time in seconds.
pub fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
