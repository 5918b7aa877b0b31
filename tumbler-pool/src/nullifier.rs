//! Nullifier set: the double-spend barrier.
//!
//! Insert-only. Consuming a nullifier and accepting the withdrawal are one
//! atomic step: the backend's insert-if-absent result decides which of two
//! racing withdrawals wins. Nothing is ever removed.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use tumbler_common::Hash32;

use crate::error::PoolError;

/// Insert-only nullifier set with in-memory and sled backends.
#[derive(Clone)]
pub struct NullifierStore {
    backend: Arc<NullifierBackend>,
}

enum NullifierBackend {
    InMemory(Mutex<HashMap<Hash32, u64>>),
    Persistent(sled::Db),
}

impl NullifierStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(NullifierBackend::InMemory(Mutex::new(HashMap::new()))),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Self {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).unwrap_or_else(|err| {
                    panic!(
                        "failed to create directory for nullifier db at {}: {}",
                        path_ref.display(),
                        err
                    )
                });
            }
        }
        let db = sled::open(path_ref).unwrap_or_else(|err| {
            panic!(
                "failed to open nullifier db at {}: {}",
                path_ref.display(),
                err
            )
        });
        Self {
            backend: Arc::new(NullifierBackend::Persistent(db)),
        }
    }

    pub fn is_spent(&self, nullifier: &Hash32) -> Result<bool, PoolError> {
        match &*self.backend {
            NullifierBackend::InMemory(set) => Ok(set
                .lock()
                .expect("nullifier store poisoned")
                .contains_key(nullifier)),
            NullifierBackend::Persistent(db) => db
                .contains_key(nullifier.as_bytes())
                .map_err(|err| PoolError::Store(format!("nullifier contains_key: {err}"))),
        }
    }

    /// Insert-if-absent. Exactly one caller wins for a given nullifier;
    /// every other caller gets [`PoolError::AlreadySpent`].
    pub fn consume(&self, nullifier: Hash32, consumed_at: u64) -> Result<(), PoolError> {
        match &*self.backend {
            NullifierBackend::InMemory(set) => {
                let mut guard = set.lock().expect("nullifier store poisoned");
                if guard.contains_key(&nullifier) {
                    return Err(PoolError::AlreadySpent);
                }
                guard.insert(nullifier, consumed_at);
                Ok(())
            }
            NullifierBackend::Persistent(db) => {
                let previous = db
                    .insert(nullifier.as_bytes(), &consumed_at.to_be_bytes())
                    .map_err(|err| PoolError::Store(format!("nullifier insert: {err}")))?;
                if previous.is_some() {
                    return Err(PoolError::AlreadySpent);
                }
                db.flush()
                    .map_err(|err| PoolError::Store(format!("nullifier flush: {err}")))?;
                Ok(())
            }
        }
    }
}
