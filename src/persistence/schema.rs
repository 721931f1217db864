// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::input::IdentityKey;
use crate::registry::{FileRecord, FileRegistry};

/// Current schema version for persisted state
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Written for held records so they stay held across restarts
const HELD_POSITION: i64 = -1;

/// Persisted registry snapshot, keyed by identity key
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u8,
    pub files: HashMap<String, PersistedFileEntry>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            files: HashMap::new(),
        }
    }
}

/// Persisted state for a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFileEntry {
    /// Last known path to the file
    pub path: String,
    /// Lines consumed. Signed so that a hand-edited negative value can be detected
    pub position: i64,
}

impl PersistedState {
    /// Snapshot of `registry`. Held records keep their invalid position; records
    /// whose path is not valid UTF-8 are left out since JSON can't carry them intact.
    pub fn from_registry(registry: &FileRegistry) -> Self {
        let mut state = Self::default();
        registry.for_each(|key, record| {
            let Some(path) = record.path.to_str() else {
                warn!(key = %key, path = ?record.path, "Not persisting position of non UTF-8 path");
                return;
            };
            let position = if record.held {
                HELD_POSITION
            } else {
                i64::try_from(record.position).unwrap_or(i64::MAX)
            };
            state.files.insert(
                key.to_string(),
                PersistedFileEntry {
                    path: path.to_string(),
                    position,
                },
            );
        });
        state
    }

    /// Registry entries of this snapshot. An entry with a negative position is
    /// restored as a held record, and its key is also returned separately.
    pub fn into_entries(self) -> (Vec<(IdentityKey, FileRecord)>, Vec<IdentityKey>) {
        let mut entries = Vec::with_capacity(self.files.len());
        let mut held = Vec::new();
        for (key, entry) in self.files {
            let key = IdentityKey::new(key);
            let record = match u64::try_from(entry.position) {
                Ok(position) => FileRecord::new(entry.path, position),
                Err(_) => {
                    held.push(key.clone());
                    FileRecord::held(entry.path)
                }
            };
            entries.push((key, record));
        }
        (entries, held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_version() {
        let state = PersistedState::default();
        assert_eq!(state.version, PERSISTED_STATE_VERSION);
        assert!(state.files.is_empty());
    }

    #[test]
    fn test_negative_positions_are_held() {
        let json = r#"{
            "version": 1,
            "files": {
                "100": {"path": "/var/log/a.log", "position": 42},
                "200": {"path": "/var/log/b.log", "position": -5}
            }
        }"#;
        let state: PersistedState = serde_json::from_str(json).unwrap();
        let (mut entries, held) = state.into_entries();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            entries,
            vec![
                (IdentityKey::from("100"), FileRecord::new("/var/log/a.log", 42)),
                (IdentityKey::from("200"), FileRecord::held("/var/log/b.log")),
            ]
        );
        assert_eq!(held, vec![IdentityKey::from("200")]);

        // Saved again, the entry is still held
        let registry = FileRegistry::from_entries(entries);
        let state = PersistedState::from_registry(&registry);
        assert!(state.files["200"].position < 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_not_persisted() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let registry = FileRegistry::new();
        registry.put("1".into(), FileRecord::new(OsStr::from_bytes(b"/var/log/\xff.log"), 9));
        registry.put("2".into(), FileRecord::new("/var/log/ok.log", 4));

        let state = PersistedState::from_registry(&registry);
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files["2"].path, "/var/log/ok.log");
    }

    #[test]
    fn test_from_registry() {
        let registry = FileRegistry::new();
        registry.put("7".into(), FileRecord::new("/var/log/app.log", 3));

        let state = PersistedState::from_registry(&registry);
        let entry = &state.files["7"];
        assert_eq!(entry.path, "/var/log/app.log");
        assert_eq!(entry.position, 3);
    }
}
