// SPDX-License-Identifier: Apache-2.0

//! JSON file store with atomic writes (write to temp, then rename).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::input::IdentityKey;
use crate::persistence::schema::{PERSISTED_STATE_VERSION, PersistedState};
use crate::registry::{FileRecord, FileRegistry};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved registry entries. A missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<(IdentityKey, FileRecord)>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .map_err(|e| Error::Persistence(format!("failed to open position file: {}", e)))?;
        let state: PersistedState = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Persistence(format!("failed to parse position file: {}", e)))?;

        if state.version != PERSISTED_STATE_VERSION {
            return Err(Error::Persistence(format!(
                "unsupported position file version {}",
                state.version
            )));
        }

        let (entries, held) = state.into_entries();
        for key in held {
            warn!(key = %key, "Persisted entry has a negative position, file will not be read");
        }
        Ok(entries)
    }

    /// Load the registry, starting empty when the snapshot can't be read.
    pub fn load_registry(&self) -> FileRegistry {
        match self.load() {
            Ok(entries) => {
                debug!(path = ?self.path, entries = entries.len(), "Loaded positions");
                FileRegistry::from_entries(entries)
            }
            Err(e) => {
                warn!(path = ?self.path, "Starting with empty registry: {}", e);
                FileRegistry::new()
            }
        }
    }

    /// Write a snapshot of `registry`.
    pub fn save(&self, registry: &FileRegistry) -> Result<()> {
        atomic_write(&self.path, &PersistedState::from_registry(registry))
    }
}

fn atomic_write(path: &Path, state: &PersistedState) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Unique per process and per write so concurrent saves never share a temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write positions: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush positions: {}", e)))?;
    drop(writer);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Persistence(format!(
            "failed to rename position file: {}",
            e
        )));
    }
    Ok(())
}
