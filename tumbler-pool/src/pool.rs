//! Privacy pool: deposits into the commitment tree, withdrawals against
//! membership proofs plus nullifier consumption.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tumbler_common::{
    denomination_for_tier, unix_time_secs, Amount, Hash32, ProofBackend, PublicSignals,
};

use crate::{
    error::PoolError,
    nullifier::NullifierStore,
    tree::{CommitmentTree, MerklePath},
};

/// Default deadline for a single proof verification.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_millis(2_000);

/// A deposit entry in the pool's append log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    pub leaf_index: u64,
    pub commitment_hash: Hash32,
    pub tree_root_after_insert: Hash32,
    pub inserted_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositReceipt {
    pub leaf_index: u64,
    pub root: Hash32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawReceipt {
    pub accepted: bool,
    pub nullifier_hash: Hash32,
}

/// The accumulator: commitment tree plus nullifier set.
///
/// Inserts are serialized through a single writer lock since each insert
/// depends on the prior tree state; reads take snapshots under the read
/// lock. The pool never learns which deposit a withdrawal corresponds to —
/// it only checks tree membership and nullifier novelty.
pub struct PrivacyPool {
    inner: RwLock<PoolInner>,
    nullifiers: NullifierStore,
    backend: Arc<dyn ProofBackend>,
    verify_timeout: Duration,
}

struct PoolInner {
    tree: CommitmentTree,
    log: Vec<Commitment>,
}

impl PrivacyPool {
    pub fn new(backend: Arc<dyn ProofBackend>, nullifiers: NullifierStore) -> Self {
        Self::with_tree(CommitmentTree::new(), backend, nullifiers)
    }

    pub fn with_tree(
        tree: CommitmentTree,
        backend: Arc<dyn ProofBackend>,
        nullifiers: NullifierStore,
    ) -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                tree,
                log: Vec::new(),
            }),
            nullifiers,
            backend,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Insert a commitment as the next leaf.
    pub fn deposit(
        &self,
        commitment_hash: Hash32,
        amount: Amount,
        tier: u8,
    ) -> Result<DepositReceipt, PoolError> {
        let denomination = denomination_for_tier(tier).ok_or_else(|| {
            PoolError::UnsupportedTier(format!("tier {tier} is not a supported denomination tier"))
        })?;
        if amount != denomination {
            return Err(PoolError::UnsupportedTier(format!(
                "amount {amount} does not match tier {tier} denomination {denomination}"
            )));
        }

        let mut inner = self.inner.write().expect("pool state poisoned");
        if inner.tree.next_index() != inner.log.len() as u64 {
            let err = PoolError::TreeCorruption(format!(
                "leaf log has {} entries but tree expects index {}",
                inner.log.len(),
                inner.tree.next_index()
            ));
            error!(code = err.error_code(), "{err}");
            return Err(err);
        }

        let (leaf_index, root) = inner.tree.insert(commitment_hash)?;
        inner.log.push(Commitment {
            leaf_index,
            commitment_hash,
            tree_root_after_insert: root,
            inserted_at: unix_time_secs(),
        });
        info!(leaf_index, tier, "commitment inserted");
        Ok(DepositReceipt { leaf_index, root })
    }

    /// Verify a withdrawal proof and consume its nullifier.
    ///
    /// The claimed root may be any root within the retained history
    /// window, so proofs generated against a slightly stale tree remain
    /// valid while concurrent deposits land. Nullifier consumption is the
    /// atomic accept decision: of two racing withdrawals on the same
    /// nullifier exactly one returns `accepted`.
    pub async fn withdraw(
        &self,
        proof: &[u8],
        signals: &PublicSignals,
    ) -> Result<WithdrawReceipt, PoolError> {
        {
            let inner = self.inner.read().expect("pool state poisoned");
            if !inner.tree.is_known_root(&signals.root) {
                return Err(PoolError::UnknownRoot(signals.root.to_hex()));
            }
        }

        let verified = tokio::time::timeout(self.verify_timeout, async {
            self.backend.verify(proof, signals).await
        })
        .await
        .map_err(|_| PoolError::ProverTimeout(self.verify_timeout.as_millis() as u64))?
        .map_err(|err| PoolError::Backend(err.to_string()))?;
        if !verified {
            warn!(nullifier = %signals.nullifier_hash, "withdrawal proof rejected");
            return Err(PoolError::InvalidProof);
        }

        self.nullifiers
            .consume(signals.nullifier_hash, unix_time_secs())?;
        info!(nullifier = %signals.nullifier_hash, "withdrawal accepted");
        Ok(WithdrawReceipt {
            accepted: true,
            nullifier_hash: signals.nullifier_hash,
        })
    }

    pub fn root(&self) -> Hash32 {
        self.inner.read().expect("pool state poisoned").tree.root()
    }

    pub fn is_known_root(&self, root: &Hash32) -> bool {
        self.inner
            .read()
            .expect("pool state poisoned")
            .tree
            .is_known_root(root)
    }

    pub fn leaf_count(&self) -> u64 {
        self.inner
            .read()
            .expect("pool state poisoned")
            .tree
            .next_index()
    }

    /// The append-log entry for a leaf, if it exists.
    pub fn commitment(&self, leaf_index: u64) -> Option<Commitment> {
        self.inner
            .read()
            .expect("pool state poisoned")
            .log
            .get(leaf_index as usize)
            .cloned()
    }

    /// Sibling path for a leaf against the current tree.
    pub fn path(&self, leaf_index: u64) -> Result<MerklePath, PoolError> {
        self.inner
            .read()
            .expect("pool state poisoned")
            .tree
            .path(leaf_index)
    }
}
