//! # tumbler-pool
//!
//! The privacy-pool accumulator: an append-only commitment tree with
//! bounded root history, an insert-only nullifier set, and the
//! deposit/withdraw entry points that tie them to the proof-backend port.
//!
//! Deposits insert fixed-denomination commitments as tree leaves;
//! withdrawals present a zero-knowledge membership proof against any
//! retained historical root and consume a nullifier, which is the
//! double-spend barrier. The pool never links a withdrawal to a deposit.

mod error;
mod nullifier;
mod pool;
mod tree;

pub use error::PoolError;
pub use nullifier::NullifierStore;
pub use pool::{
    Commitment, DepositReceipt, PrivacyPool, WithdrawReceipt, DEFAULT_VERIFY_TIMEOUT,
};
pub use tree::{
    hash_pair, verify_path, CommitmentTree, MerklePath, ROOT_HISTORY_SIZE, TREE_DEPTH,
};
