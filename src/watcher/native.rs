// SPDX-License-Identifier: Apache-2.0

//! Native file system watcher using the `notify` crate.
//!
//! Uses OS-level file system notifications:
//! - Linux: inotify
//! - macOS: FSEvents
//! - Windows: ReadDirectoryChangesW

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::bounded_channel::BoundedSender;
use crate::error::{Error, Result};
use crate::reconciler::Notification;

/// Watches directories and forwards every relevant change as a [`Notification`].
///
/// Forwarding blocks while the notification queue is full, so a slow reconciler
/// slows the watcher down instead of dropping events.
pub struct NativeWatcher {
    watcher: RecommendedWatcher,
}

impl NativeWatcher {
    pub fn new(tx: BoundedSender<Notification>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for notification in Self::convert_event(event) {
                        if tx.send_blocking(notification).is_err() {
                            // Source is shutting down
                            return;
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
            Config::default(),
        )
        .map_err(|e| Error::Watcher(format!("initialization failed: {}", e)))?;

        Ok(Self { watcher })
    }

    /// Start watching the entries of `dir`.
    pub fn watch(&mut self, dir: &Path) -> Result<()> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watcher(format!("watch {:?} failed: {}", dir, e)))?;
        debug!(path = ?dir, "Watching directory");
        Ok(())
    }

    /// Watch every directory in `dirs`, returning how many could be watched.
    /// Failures are logged; a directory created later is not picked up.
    pub fn watch_all(&mut self, dirs: &[PathBuf]) -> usize {
        let mut watching = 0;
        for dir in dirs {
            match self.watch(dir) {
                Ok(()) => watching += 1,
                Err(e) => warn!("{}", e),
            }
        }
        watching
    }

    pub fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            "native"
        }
    }

    /// Convert a notify event into notifications.
    fn convert_event(event: Event) -> Vec<Notification> {
        let mut paths = event.paths.into_iter();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                match (paths.next(), paths.next()) {
                    (Some(from), Some(to)) => vec![Notification::renamed(from, to)],
                    (Some(to), None) => vec![Notification::created(to)],
                    _ => Vec::new(),
                }
            }
            // The other half of an unpaired rename
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                paths.map(Notification::deleted).collect()
            }
            EventKind::Modify(ModifyKind::Name(_)) | EventKind::Create(_) => {
                paths.map(Notification::created).collect()
            }
            EventKind::Modify(_) => paths.map(Notification::modified).collect(),
            EventKind::Remove(_) => paths.map(Notification::deleted).collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }
}
