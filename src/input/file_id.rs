// SPDX-License-Identifier: Apache-2.0

//! File identity based on the inode number.
//!
//! The key stays stable while a file is renamed, which is what lets the registry
//! follow a log file through rotation. It is NOT stable across replacement: once a
//! file is deleted its inode number may be handed to an unrelated new file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};

/// Opaque identity of a file: its inode number rendered as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a key from a raw inode number.
    pub fn from_ino(ino: u64) -> Self {
        Self(ino.to_string())
    }

    /// Identity of an already open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self::from_ino(metadata.ino()))
    }

    #[cfg(not(unix))]
    pub fn from_file(_file: &File) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "inode identity is only available on unix platforms",
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Resolves the current on-disk identity of a path.
pub trait IdentityResolver: Send + Sync {
    /// Fails when the path is missing or unreadable.
    fn resolve(&self, path: &Path) -> Result<IdentityKey>;

    /// Resolve the identity of a handle that is already open.
    fn resolve_open(&self, path: &Path, file: &File) -> Result<IdentityKey> {
        IdentityKey::from_file(file).map_err(|source| Error::Identity {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolver backed by the OS inode number.
#[derive(Debug, Clone, Copy, Default)]
pub struct InodeResolver;

impl IdentityResolver for InodeResolver {
    fn resolve(&self, path: &Path) -> Result<IdentityKey> {
        let file = File::open(path).map_err(|source| Error::Identity {
            path: path.to_path_buf(),
            source,
        })?;
        self.resolve_open(path, &file)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::fs::File;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::{IdentityKey, IdentityResolver};
    use crate::error::{Error, Result};

    /// Resolver with hand-assigned identities, used to stage inode reuse.
    #[derive(Default)]
    pub struct FakeResolver {
        ids: Mutex<HashMap<PathBuf, IdentityKey>>,
    }

    impl FakeResolver {
        pub fn assign(&self, path: &Path, key: &str) {
            self.ids
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), IdentityKey::from(key));
        }

        pub fn forget(&self, path: &Path) {
            self.ids.lock().unwrap().remove(path);
        }
    }

    impl IdentityResolver for FakeResolver {
        fn resolve(&self, path: &Path) -> Result<IdentityKey> {
            self.ids
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::Identity {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no identity assigned"),
                })
        }

        fn resolve_open(&self, path: &Path, _file: &File) -> Result<IdentityKey> {
            self.resolve(path)
        }
    }
}
