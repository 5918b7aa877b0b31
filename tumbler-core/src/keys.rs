//! Intermediate-address key material.
//!
//! Hop addresses are derived from fresh random secrets; the secret is the
//! only way to spend from the address, so it is backed up (encrypted)
//! before any transfer touches the address and zeroized when dropped.

use rand::RngCore;
use tumbler_common::Address;
use zeroize::Zeroizing;

/// Secret plus the address it controls.
pub struct HopKeyMaterial {
    pub address: Address,
    pub secret: Zeroizing<[u8; 32]>,
}

/// Generate a fresh hop key from the OS rng.
pub fn generate_hop_key() -> HopKeyMaterial {
    let mut secret = Zeroizing::new([0u8; 32]);
    rand::rngs::OsRng.fill_bytes(secret.as_mut());
    let address = derive_address(secret.as_ref());
    HopKeyMaterial { address, secret }
}

/// Derive the ledger address controlled by a secret.
pub fn derive_address(secret: &[u8]) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tumbler.hop-address.v1");
    hasher.update(secret);
    let digest = hasher.finalize();
    Address::new(format!("hop1{}", hex::encode(&digest.as_bytes()[..20])))
}
