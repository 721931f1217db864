// SPDX-License-Identifier: Apache-2.0

use glob::{MatchOptions, Pattern, glob};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Decides which paths are tailed at all.
pub trait PathFilter: Send + Sync {
    fn accepts(&self, path: &Path) -> bool;
}

/// Include/exclude filter over glob patterns. Also performs the startup walk.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl GlobFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| Pattern::new(p).map_err(|e| Error::Config(format!("glob {:?}: {}", p, e))))
                .collect()
        };

        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Find all existing regular files accepted by this filter.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern.as_str())
                .map_err(|e| Error::Config(format!("glob {:?}: {}", pattern.as_str(), e)))?;

            for entry in matches {
                let path = entry.map_err(|e| Error::Io(e.into()))?;
                if path.is_dir() || !self.accepts(&path) {
                    continue;
                }
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }

    /// Directories that have to be watched to see every path the include patterns can match.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for pattern in &self.include {
            let mut dir = PathBuf::new();
            for component in Path::new(pattern.as_str()).components() {
                let comp = component.as_os_str().to_string_lossy();
                if comp.contains('*') || comp.contains('?') || comp.contains('[') {
                    break;
                }
                dir.push(component);
            }
            // A fully literal pattern names a file, watch its parent
            if !dir.is_dir() {
                if let Some(parent) = dir.parent() {
                    dir = parent.to_path_buf();
                }
            }
            if !dir.as_os_str().is_empty() && !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }
}

impl PathFilter for GlobFilter {
    fn accepts(&self, path: &Path) -> bool {
        self.include
            .iter()
            .any(|p| p.matches_path_with(path, MATCH_OPTIONS))
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }
}
