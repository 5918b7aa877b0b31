//! Versioned record store: the persistence port.
//!
//! Single-record read-modify-write with optimistic concurrency: every
//! record carries a monotonically increasing version, and conditional
//! writes fail with a version conflict instead of clobbering concurrent
//! updates. Two backends behind one type: an in-memory map for tests and
//! sled for durable deployments. Writes are flushed before success is
//! reported; the backup-before-transfer invariant depends on that.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A stored value together with its current version.
#[derive(Clone, Debug)]
pub struct VersionedRecord {
    pub version: u64,
    pub bytes: Vec<u8>,
}

/// Key-value store with per-record versioning and atomic batches.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<Backend>,
}

enum Backend {
    InMemory(Mutex<BTreeMap<Vec<u8>, (u64, Vec<u8>)>>),
    Persistent(sled::Db),
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(Backend::InMemory(Mutex::new(BTreeMap::new()))),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Self {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).unwrap_or_else(|err| {
                    panic!(
                        "failed to create directory for record store at {}: {}",
                        path_ref.display(),
                        err
                    )
                });
            }
        }
        let db = sled::open(path_ref).unwrap_or_else(|err| {
            panic!(
                "failed to open record store at {}: {}",
                path_ref.display(),
                err
            )
        });
        Self {
            backend: Arc::new(Backend::Persistent(db)),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<VersionedRecord>, StoreError> {
        match &*self.backend {
            Backend::InMemory(map) => Ok(map
                .lock()
                .expect("record store poisoned")
                .get(key)
                .map(|(version, bytes)| VersionedRecord {
                    version: *version,
                    bytes: bytes.clone(),
                })),
            Backend::Persistent(db) => {
                let value = db
                    .get(key)
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                value.map(|raw| decode_record(&raw)).transpose()
            }
        }
    }

    /// Write a record, optionally conditioned on its current version.
    ///
    /// `expected` semantics: `None` is an unconditional upsert, `Some(0)`
    /// requires the record to be absent, `Some(v)` requires the current
    /// version to equal `v`. Returns the new version.
    pub fn put(&self, key: &[u8], value: &[u8], expected: Option<u64>) -> Result<u64, StoreError> {
        match &*self.backend {
            Backend::InMemory(map) => {
                let mut guard = map.lock().expect("record store poisoned");
                let actual = guard.get(key).map(|(v, _)| *v).unwrap_or(0);
                if let Some(expected) = expected {
                    if actual != expected {
                        return Err(StoreError::VersionConflict { expected, actual });
                    }
                }
                let next = actual + 1;
                guard.insert(key.to_vec(), (next, value.to_vec()));
                Ok(next)
            }
            Backend::Persistent(db) => loop {
                let current = db
                    .get(key)
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                let actual = match &current {
                    Some(raw) => decode_record(raw)?.version,
                    None => 0,
                };
                if let Some(expected) = expected {
                    if actual != expected {
                        return Err(StoreError::VersionConflict { expected, actual });
                    }
                }
                let next = actual + 1;
                let encoded = encode_record(next, value);
                let swap = db
                    .compare_and_swap(key, current, Some(encoded))
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                match swap {
                    Ok(()) => {
                        db.flush()
                            .map_err(|err| StoreError::Backend(err.to_string()))?;
                        return Ok(next);
                    }
                    Err(_) if expected.is_some() => {
                        let actual = self.get(key)?.map(|r| r.version).unwrap_or(0);
                        return Err(StoreError::VersionConflict {
                            expected: expected.unwrap_or(0),
                            actual,
                        });
                    }
                    // Unconditional write lost a race; retry against the new state.
                    Err(_) => continue,
                }
            },
        }
    }

    /// All records whose key starts with `prefix`, in key order.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, VersionedRecord)>, StoreError> {
        match &*self.backend {
            Backend::InMemory(map) => {
                let guard = map.lock().expect("record store poisoned");
                Ok(guard
                    .range(prefix.to_vec()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(key, (version, bytes))| {
                        (
                            key.clone(),
                            VersionedRecord {
                                version: *version,
                                bytes: bytes.clone(),
                            },
                        )
                    })
                    .collect())
            }
            Backend::Persistent(db) => {
                let mut out = Vec::new();
                for entry in db.scan_prefix(prefix) {
                    let (key, raw) = entry.map_err(|err| StoreError::Backend(err.to_string()))?;
                    out.push((key.to_vec(), decode_record(&raw)?));
                }
                Ok(out)
            }
        }
    }

    /// Atomically insert a batch of fresh records (all-or-nothing).
    ///
    /// Existing records are overwritten at version 1; the intended use is
    /// retrying an identical batch after a partial failure, never merging.
    pub fn insert_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        match &*self.backend {
            Backend::InMemory(map) => {
                let mut guard = map.lock().expect("record store poisoned");
                for (key, value) in entries {
                    guard.insert(key.clone(), (1, value.clone()));
                }
                Ok(())
            }
            Backend::Persistent(db) => {
                let mut batch = sled::Batch::default();
                for (key, value) in entries {
                    batch.insert(key.as_slice(), encode_record(1, value));
                }
                db.apply_batch(batch)
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                db.flush()
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                Ok(())
            }
        }
    }
}

fn encode_record(version: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

fn decode_record(raw: &[u8]) -> Result<VersionedRecord, StoreError> {
    if raw.len() < 8 {
        return Err(StoreError::Corrupt(format!(
            "record shorter than version header: {} bytes",
            raw.len()
        )));
    }
    let mut version_bytes = [0u8; 8];
    version_bytes.copy_from_slice(&raw[..8]);
    Ok(VersionedRecord {
        version: u64::from_be_bytes(version_bytes),
        bytes: raw[8..].to_vec(),
    })
}
