// SPDX-License-Identifier: Apache-2.0

//! Authoritative map from file identity to current path and read position.
//!
//! Every operation takes the single registry lock for its whole duration and releases
//! it before returning, so callers never hold it across file I/O. Operations on an
//! absent key are no-ops: callers check presence explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::input::IdentityKey;

/// Where a tracked file currently lives and how many lines of it were consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub position: u64,
    /// Restored with an invalid position. Never read from; the key stays known
    /// until the file goes away or rotates out of the monitored set.
    #[serde(default)]
    pub held: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, position: u64) -> Self {
        Self {
            path: path.into(),
            position,
            held: false,
        }
    }

    pub fn held(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: 0,
            held: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct FileRegistry {
    files: Mutex<HashMap<IdentityKey, FileRecord>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated from a persisted snapshot.
    pub fn from_entries(entries: impl IntoIterator<Item = (IdentityKey, FileRecord)>) -> Self {
        Self {
            files: Mutex::new(entries.into_iter().collect()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IdentityKey, FileRecord>> {
        // The map is never left half-updated, so a poisoned lock is still consistent
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<FileRecord> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn put(&self, key: IdentityKey, record: FileRecord) {
        self.lock().insert(key, record);
    }

    pub fn remove(&self, key: &IdentityKey) -> Option<FileRecord> {
        self.lock().remove(key)
    }

    /// Remove `key` only if its record still satisfies `predicate`.
    ///
    /// Used by sweeps that inspected the record outside the lock and must not
    /// discard an entry that was repointed in the meantime.
    pub fn remove_if(&self, key: &IdentityKey, predicate: impl FnOnce(&FileRecord) -> bool) -> bool {
        let mut files = self.lock();
        match files.get(key) {
            Some(record) if predicate(record) => {
                files.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Repoint a record to a new path, keeping its position.
    pub fn set_path(&self, key: &IdentityKey, path: &Path) -> bool {
        match self.lock().get_mut(key) {
            Some(record) => {
                record.path = path.to_path_buf();
                true
            }
            None => false,
        }
    }

    /// Move the read position forward by `lines`.
    pub fn advance(&self, key: &IdentityKey, lines: u64) -> bool {
        match self.lock().get_mut(key) {
            Some(record) => {
                record.position = record.position.saturating_add(lines);
                true
            }
            None => false,
        }
    }

    /// Reset the read position after the file was truncated in place.
    pub fn rewind(&self, key: &IdentityKey, position: u64) -> bool {
        match self.lock().get_mut(key) {
            Some(record) => {
                record.position = position;
                true
            }
            None => false,
        }
    }

    /// Visit every entry while holding the lock.
    pub fn for_each(&self, mut visitor: impl FnMut(&IdentityKey, &FileRecord)) {
        for (key, record) in self.lock().iter() {
            visitor(key, record);
        }
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> Vec<(IdentityKey, FileRecord)> {
        self.lock()
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
