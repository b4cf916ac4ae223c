//! Persisted read offsets keyed by file identity.
//!
//! An [`OffsetDatabase`] holds one map per scope (operator id), each mapping
//! a fingerprint key to the last offset handed off for that file. A database
//! is either purely in memory or backed by a JSON file. Changes only touch
//! memory; [`OffsetDatabase::checkpoint`] rewrites the file atomically when
//! something changed since the last checkpoint.
//!
//! A file shorter than the fingerprint size may have grown while the process
//! was down. Lookups therefore fall back to the longest stored fingerprint
//! that is a prefix of the current one.

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Key/value persistence of read offsets for one operator.
pub trait OffsetStore: Send + Sync {
    /// Last persisted offset for a file identity.
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<u64>>;

    /// Records `offset` for a file identity. `path` is informational.
    fn put(&self, fingerprint: &Fingerprint, offset: u64, path: &Path) -> Result<()>;

    fn remove(&self, fingerprint: &Fingerprint) -> Result<()>;

    /// Makes every change so far durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// One persisted offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOffset {
    pub offset: u64,
    /// Last path the file was read from.
    pub path: String,
    /// Number of leading bytes the key was computed from.
    #[serde(default)]
    pub fingerprint_len: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    scopes: BTreeMap<String, BTreeMap<String, StoredOffset>>,
}

/// Shared handle to an offset database.
#[derive(Debug, Clone)]
pub struct OffsetDatabase {
    /// `None` for an in-memory database.
    path: Option<PathBuf>,
    state: Arc<RwLock<DatabaseState>>,
    /// Set when memory holds changes the file does not.
    dirty: Arc<AtomicBool>,
    /// Serializes checkpoints so an older snapshot never lands last.
    writing: Arc<Mutex<()>>,
}

impl OffsetDatabase {
    /// Opens the database at `path`, creating it on first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            DatabaseState::default()
        };

        Ok(Self::with_state(Some(path), state))
    }

    /// A database that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_state(None, DatabaseState::default())
    }

    fn with_state(path: Option<PathBuf>, state: DatabaseState) -> Self {
        Self {
            path,
            state: Arc::new(RwLock::new(state)),
            dirty: Arc::new(AtomicBool::new(false)),
            writing: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store handle limited to one scope.
    pub fn scope(&self, name: impl Into<String>) -> ScopedOffsets {
        ScopedOffsets {
            db: self.clone(),
            scope: name.into(),
        }
    }

    /// Every entry of a scope, for inspection.
    pub fn entries(&self, scope: &str) -> BTreeMap<String, StoredOffset> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.scopes.get(scope).cloned().unwrap_or_default()
    }

    fn update<F>(&self, scope: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, StoredOffset>) -> bool,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if change(state.scopes.entry(scope.to_string()).or_default()) {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Whether changes are waiting for the next checkpoint.
    pub fn is_dirty(&self) -> bool {
        self.path.is_some() && self.dirty.load(Ordering::Acquire)
    }

    /// Writes the database file if anything changed since the last
    /// checkpoint. A no-op for in-memory databases.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _writing = self.writing.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let written = self.snapshot().and_then(|bytes| atomic_write(path, &bytes));
        if written.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        written
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(serde_json::to_vec_pretty(&*state)?)
    }
}

/// Offsets of one operator inside an [`OffsetDatabase`].
#[derive(Debug, Clone)]
pub struct ScopedOffsets {
    db: OffsetDatabase,
    scope: String,
}

impl ScopedOffsets {
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl OffsetStore for ScopedOffsets {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<u64>> {
        let state = self.db.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = state.scopes.get(&self.scope) else {
            return Ok(None);
        };

        if let Some(stored) = entries.get(&fingerprint.key()) {
            return Ok(Some(stored.offset));
        }

        Ok(entries
            .iter()
            .filter(|(_, stored)| stored.fingerprint_len > 0)
            .filter(|(key, stored)| {
                fingerprint.prefix_key(stored.fingerprint_len).as_ref() == Some(*key)
            })
            .max_by_key(|(_, stored)| stored.fingerprint_len)
            .map(|(_, stored)| stored.offset))
    }

    fn put(&self, fingerprint: &Fingerprint, offset: u64, path: &Path) -> Result<()> {
        let key = fingerprint.key();
        let stored = StoredOffset {
            offset,
            path: path.display().to_string(),
            fingerprint_len: fingerprint.len(),
        };
        self.db.update(&self.scope, |entries| {
            if entries.get(&key) == Some(&stored) {
                return false;
            }
            if !entries.contains_key(&key) {
                // a shorter fingerprint of the same file is superseded
                entries.retain(|old, previous| {
                    previous.fingerprint_len >= stored.fingerprint_len
                        || fingerprint.prefix_key(previous.fingerprint_len).as_ref() != Some(old)
                });
            }
            entries.insert(key, stored);
            true
        })
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        let key = fingerprint.key();
        self.db
            .update(&self.scope, |entries| entries.remove(&key).is_some())
    }

    fn flush(&self) -> Result<()> {
        self.db.checkpoint()
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let unique_id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let mut writer = BufWriter::new(File::create(&temp_path)?);
    writer.write_all(bytes)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    Ok(())
}
