// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::{debug, info};

use crate::input::IdentityResolver;
use crate::registry::FileRegistry;
use crate::stats::TailStats;

/// Periodic sweep that drops registry entries whose file is gone or whose path
/// now belongs to a different file.
pub struct StaleEntryReaper {
    registry: Arc<FileRegistry>,
    resolver: Arc<dyn IdentityResolver>,
    stats: Arc<TailStats>,
}

impl StaleEntryReaper {
    pub fn new(
        registry: Arc<FileRegistry>,
        resolver: Arc<dyn IdentityResolver>,
        stats: Arc<TailStats>,
    ) -> Self {
        Self {
            registry,
            resolver,
            stats,
        }
    }

    /// Run one sweep, returning the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;

        // File checks happen outside the registry lock; removal re-checks the path
        for (key, record) in self.registry.snapshot() {
            let reason = if !record.path.exists() {
                "path no longer exists"
            } else {
                match self.resolver.resolve(&record.path) {
                    Ok(current) if current == key => continue,
                    Ok(_) => "path belongs to a different file",
                    Err(_) => "path no longer readable",
                }
            };

            if self
                .registry
                .remove_if(&key, |current| current.path == record.path)
            {
                debug!(key = %key, path = ?record.path, "Removed stale entry: {}", reason);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, remaining = self.registry.len(), "Reaped stale entries");
            self.stats.record_reaped(removed);
        }
        removed
    }
}
