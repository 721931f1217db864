// SPDX-License-Identifier: Apache-2.0

//! Maps file-system notifications onto registry updates and tail passes.
//!
//! Identity comes from the inode of the notified path. A known inode seen at a
//! new path is a rename: whatever was written before the rename is drained under
//! the old path and any multi-line record still open under that path is finished,
//! then the record is repointed or dropped. A record that belonged
//! to an unmonitored path never carries its position over to the file that now
//! owns the recycled inode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::input::{IdentityKey, IdentityResolver, LineTailer, PathFilter, count_lines};
use crate::registry::{FileRecord, FileRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Created,
    Modified,
    Deleted,
}

/// A file-system change reported by the directory watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub path: PathBuf,
    pub previous: Option<PathBuf>,
}

impl Notification {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: NotificationKind::Created,
            path: path.into(),
            previous: None,
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: NotificationKind::Modified,
            path: path.into(),
            previous: None,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: NotificationKind::Deleted,
            path: path.into(),
            previous: None,
        }
    }

    /// A rename: the file formerly at `from` is now at `to`.
    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: NotificationKind::Created,
            path: to.into(),
            previous: Some(from.into()),
        }
    }
}

/// What a single notification did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing to do: deleted, filtered out, or identity unavailable.
    Ignored,
    /// New identity registered at position 0 and tailed.
    Registered { key: IdentityKey, lines: u64 },
    /// Ordinary append to a known file.
    Appended { key: IdentityKey, lines: u64 },
    /// Known file renamed within the monitored set; record repointed.
    Rotated {
        key: IdentityKey,
        from: PathBuf,
        flushed: u64,
    },
    /// Known file renamed out of the monitored set; drained and forgotten.
    Retired {
        key: IdentityKey,
        from: PathBuf,
        flushed: u64,
    },
    /// The identity was held by a record for an unmonitored path. That record was
    /// stale and has been dropped; `registered` tells whether the new path was
    /// registered fresh in its place.
    Replaced {
        key: IdentityKey,
        stale_path: PathBuf,
        registered: bool,
    },
}

pub struct RotationReconciler {
    registry: Arc<FileRegistry>,
    tailer: Arc<LineTailer>,
    filter: Arc<dyn PathFilter>,
    resolver: Arc<dyn IdentityResolver>,
}

impl RotationReconciler {
    pub fn new(
        registry: Arc<FileRegistry>,
        tailer: Arc<LineTailer>,
        filter: Arc<dyn PathFilter>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            registry,
            tailer,
            filter,
            resolver,
        }
    }

    /// Apply one notification. Only fatal errors (sink failures) are returned.
    pub fn handle(&self, notification: &Notification) -> Result<Reconciliation> {
        let path = notification.path.as_path();

        if notification.kind == NotificationKind::Deleted {
            // Nothing left to read; stale entries are the reaper's job
            debug!(path = ?path, "File deleted");
            return Ok(Reconciliation::Ignored);
        }

        let key = match self.resolver.resolve(path) {
            Ok(key) => key,
            Err(e) => {
                debug!(path = ?path, "Skipping notification: {}", e);
                return Ok(Reconciliation::Ignored);
            }
        };

        match self.registry.get(&key) {
            None => {
                if !self.filter.accepts(path) {
                    return Ok(Reconciliation::Ignored);
                }
                Ok(Reconciliation::Registered {
                    lines: self.register(&key, path, 0)?,
                    key,
                })
            }
            Some(record) if record.path == path => {
                let outcome = self.tailer.tail(&key)?;
                Ok(Reconciliation::Appended {
                    key,
                    lines: outcome.lines,
                })
            }
            Some(record) => {
                if let Some(previous) = &notification.previous {
                    if previous != &record.path {
                        debug!(
                            key = %key,
                            reported = ?previous,
                            recorded = ?record.path,
                            "Rename source differs from recorded path"
                        );
                    }
                }
                self.rotate(key, record, path)
            }
        }
    }

    fn rotate(&self, key: IdentityKey, record: FileRecord, path: &Path) -> Result<Reconciliation> {
        let old_monitored = self.filter.accepts(&record.path);
        let new_monitored = self.filter.accepts(path);

        // Drain what was written under the old name before touching the record,
        // then finish any record left open there: a new file may appear at that path
        let flushed = if old_monitored {
            let lines = self.tailer.tail_via(&key, path)?.lines;
            self.tailer.close_pending(&record.path)?;
            lines
        } else {
            0
        };

        match (old_monitored, new_monitored) {
            (true, true) => {
                self.registry.set_path(&key, path);
                info!(key = %key, from = ?record.path, to = ?path, flushed, "File rotated");
                Ok(Reconciliation::Rotated {
                    key,
                    from: record.path,
                    flushed,
                })
            }
            (true, false) => {
                self.registry.remove(&key);
                info!(
                    key = %key,
                    from = ?record.path,
                    to = ?path,
                    flushed,
                    "File rotated out of the monitored set"
                );
                Ok(Reconciliation::Retired {
                    key,
                    from: record.path,
                    flushed,
                })
            }
            (false, _) => {
                // The inode was recycled: the old record describes an unrelated file
                self.registry.remove(&key);
                warn!(
                    key = %key,
                    stale_path = ?record.path,
                    stale_position = record.position,
                    path = ?path,
                    "Dropped stale record for reused identity"
                );
                if new_monitored {
                    self.register(&key, path, 0)?;
                }
                Ok(Reconciliation::Replaced {
                    key,
                    stale_path: record.path,
                    registered: new_monitored,
                })
            }
        }
    }

    fn register(&self, key: &IdentityKey, path: &Path, position: u64) -> Result<u64> {
        debug!(key = %key, path = ?path, position, "Tracking new file");
        self.registry
            .put(key.clone(), FileRecord::new(path, position));
        Ok(self.tailer.tail(key)?.lines)
    }

    /// Register the files present at startup.
    ///
    /// Known identities are reconciled like any other notification. Unknown ones start
    /// at line 0 when `read_existing` is set, otherwise at their current end.
    pub fn bootstrap(&self, paths: &[PathBuf], read_existing: bool) -> Result<usize> {
        let mut registered = 0;
        for path in paths {
            let key = match self.resolver.resolve(path) {
                Ok(key) => key,
                Err(e) => {
                    debug!(path = ?path, "Skipping pre-existing file: {}", e);
                    continue;
                }
            };

            if self.registry.contains(&key) {
                self.handle(&Notification::modified(path.clone()))?;
                continue;
            }
            if !self.filter.accepts(path) {
                continue;
            }

            let position = if read_existing {
                0
            } else {
                match count_lines(path) {
                    Ok(lines) => lines,
                    Err(e) => {
                        debug!(path = ?path, "Skipping pre-existing file: {}", e);
                        continue;
                    }
                }
            };
            self.register(&key, path, position)?;
            registered += 1;
        }

        info!(registered, tracked = self.registry.len(), "Startup scan finished");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{FakeResolver, GlobFilter, InodeResolver};
    use crate::multiline::{CoalescerOptions, LineClassifier, MultilineCoalescer, SourceHeader};
    use crate::sink::MemorySink;
    use crate::stats::TailStats;
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        registry: Arc<FileRegistry>,
        coalescer: Arc<MultilineCoalescer>,
        sink: Arc<MemorySink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_classifier(LineClassifier::disabled())
        }

        fn with_classifier(classifier: LineClassifier) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                registry: Arc::new(FileRegistry::new()),
                coalescer: Arc::new(MultilineCoalescer::new(
                    classifier,
                    SourceHeader::visible("file"),
                    CoalescerOptions::default(),
                )),
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn reconciler(&self, resolver: Arc<dyn IdentityResolver>) -> RotationReconciler {
            let include = vec![format!("{}/*.log", self.dir.path().display())];
            let exclude = vec![format!("{}/excluded*.log", self.dir.path().display())];
            let tailer = LineTailer::new(
                self.registry.clone(),
                self.coalescer.clone(),
                self.sink.clone(),
                resolver.clone(),
                Arc::new(TailStats::default()),
                4096,
            );
            RotationReconciler::new(
                self.registry.clone(),
                Arc::new(tailer),
                Arc::new(GlobFilter::new(&include, &exclude).unwrap()),
                resolver,
            )
        }

        fn delivered(&self) -> Vec<(String, String)> {
            self.coalescer.drain(self.sink.as_ref()).unwrap();
            self.sink
                .events()
                .into_iter()
                .map(|e| (e.body_lossy().into_owned(), e.headers["file"].clone()))
                .collect()
        }
    }

    fn append(path: &Path, content: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_unseen_file_is_registered_and_read_from_start() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        append(&path, "before watch\n");

        let result = reconciler.handle(&Notification::created(&path)).unwrap();
        let key = InodeResolver.resolve(&path).unwrap();
        assert_eq!(result, Reconciliation::Registered { key: key.clone(), lines: 1 });
        assert_eq!(fx.registry.get(&key).unwrap(), FileRecord::new(&path, 1));
    }

    #[test]
    fn test_filtered_file_is_ignored() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("notes.txt");
        append(&path, "x\n");

        let result = reconciler.handle(&Notification::created(&path)).unwrap();
        assert_eq!(result, Reconciliation::Ignored);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_append_tails_known_file() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        append(&path, "1\n");
        reconciler.handle(&Notification::created(&path)).unwrap();

        append(&path, "2\n3\n");
        let result = reconciler.handle(&Notification::modified(&path)).unwrap();
        assert!(matches!(result, Reconciliation::Appended { lines: 2, .. }));
        assert_eq!(fx.delivered().len(), 3);
    }

    #[test]
    fn test_delete_never_mutates_registry() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        append(&path, "1\n");
        reconciler.handle(&Notification::created(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        let result = reconciler.handle(&Notification::deleted(&path)).unwrap();
        assert_eq!(result, Reconciliation::Ignored);
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_rename_flushes_tail_under_old_path_then_repoints() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        let rotated = fx.path("app-1.log");
        append(&path, "first\n");
        reconciler.handle(&Notification::created(&path)).unwrap();
        let key = InodeResolver.resolve(&path).unwrap();

        // Written just before rotation, never notified
        append(&path, "last words\n");
        std::fs::rename(&path, &rotated).unwrap();

        let result = reconciler
            .handle(&Notification::renamed(&path, &rotated))
            .unwrap();
        assert_eq!(
            result,
            Reconciliation::Rotated {
                key: key.clone(),
                from: path.clone(),
                flushed: 1
            }
        );
        assert!(!path.exists());
        assert_eq!(fx.registry.get(&key).unwrap(), FileRecord::new(&rotated, 2));

        let delivered = fx.delivered();
        assert_eq!(
            delivered[1],
            ("last words".to_string(), path.display().to_string())
        );

        // Subsequent appends are attributed to the new path
        append(&rotated, "after\n");
        reconciler.handle(&Notification::modified(&rotated)).unwrap();
        assert_eq!(fx.registry.get(&key).unwrap().position, 3);
    }

    #[test]
    fn test_rename_out_of_monitored_set_drains_and_forgets() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        let rotated = fx.path("app.log.1");
        append(&path, "first\n");
        reconciler.handle(&Notification::created(&path)).unwrap();

        append(&path, "tail\n");
        std::fs::rename(&path, &rotated).unwrap();
        let result = reconciler
            .handle(&Notification::renamed(&path, &rotated))
            .unwrap();

        assert!(matches!(result, Reconciliation::Retired { flushed: 1, .. }));
        assert!(fx.registry.is_empty());
        assert_eq!(fx.delivered().len(), 2);
    }

    fn stack_traces() -> LineClassifier {
        LineClassifier::new(r"^(Exception|\s+at )", false, None).unwrap()
    }

    #[test]
    fn test_open_record_is_finished_when_its_file_rotates_away() {
        let fx = Fixture::with_classifier(stack_traces());
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        let rotated = fx.path("app.log.1");
        append(&path, "Exception: old\n  at old1\n");
        reconciler.handle(&Notification::created(&path)).unwrap();
        assert_eq!(fx.coalescer.len(), 2);

        std::fs::rename(&path, &rotated).unwrap();
        let result = reconciler
            .handle(&Notification::renamed(&path, &rotated))
            .unwrap();
        assert!(matches!(result, Reconciliation::Retired { flushed: 0, .. }));
        assert!(fx.coalescer.is_empty());

        // A new file at the old path starts with a continuation-looking line
        append(&path, "  at new1\nhello\n");
        reconciler.handle(&Notification::created(&path)).unwrap();

        let bodies: Vec<String> = fx.delivered().into_iter().map(|(b, _)| b).collect();
        assert_eq!(bodies, vec!["Exception: old\n  at old1", "  at new1", "hello"]);
    }

    #[test]
    fn test_open_record_keeps_old_path_across_rename_in_set() {
        let fx = Fixture::with_classifier(stack_traces());
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        let rotated = fx.path("app-1.log");
        append(&path, "Exception: boom\n");
        reconciler.handle(&Notification::created(&path)).unwrap();

        append(&path, "  at frame\n");
        std::fs::rename(&path, &rotated).unwrap();
        let result = reconciler
            .handle(&Notification::renamed(&path, &rotated))
            .unwrap();
        assert!(matches!(result, Reconciliation::Rotated { flushed: 1, .. }));

        // Emitted at rotation time, without waiting for a drain or shutdown
        assert!(fx.coalescer.is_empty());
        let events = fx.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body_lossy(), "Exception: boom\n  at frame");
        assert_eq!(events[0].headers["file"], path.display().to_string());
    }

    #[test]
    fn test_reused_identity_from_unmonitored_file_is_not_inherited() {
        let fx = Fixture::new();
        let resolver = Arc::new(FakeResolver::default());
        let reconciler = fx.reconciler(resolver.clone());

        let excluded = fx.path("excluded.log");
        let app = fx.path("app.log");
        let app_rotated = fx.path("app-1.log");

        // K1 tracks an unmonitored file with its own position; K2 tracks app.log
        fx.registry.put("1".into(), FileRecord::new(&excluded, 7));
        append(&app, "old 1\nold 2\nold 3\n");
        resolver.assign(&app, "2");
        reconciler.handle(&Notification::modified(&app)).unwrap();
        assert_eq!(fx.registry.get(&"2".into()).unwrap().position, 3);

        // Both rotate at once; the new app.log receives K1's old inode number
        std::fs::rename(&app, &app_rotated).unwrap();
        resolver.forget(&app);
        resolver.assign(&app_rotated, "2");
        append(&app, "new 1\n");
        resolver.assign(&app, "1");

        let result = reconciler.handle(&Notification::created(&app)).unwrap();
        assert_eq!(
            result,
            Reconciliation::Replaced {
                key: "1".into(),
                stale_path: excluded.clone(),
                registered: true
            }
        );

        // The new app.log starts from its own first line, not from K1's position 7
        let fresh = fx.registry.get(&"1".into()).unwrap();
        assert_eq!(fresh, FileRecord::new(&app, 1));
        assert!(fx.registry.snapshot().iter().all(|(_, r)| r.path != excluded));

        // K2 follows its own rename
        let result = reconciler
            .handle(&Notification::renamed(&app, &app_rotated))
            .unwrap();
        assert!(matches!(result, Reconciliation::Rotated { flushed: 0, .. }));
        assert_eq!(
            fx.registry.get(&"2".into()).unwrap(),
            FileRecord::new(&app_rotated, 3)
        );

        let bodies: Vec<String> = fx.delivered().into_iter().map(|(b, _)| b).collect();
        assert_eq!(bodies, vec!["old 1", "old 2", "old 3", "new 1"]);
    }

    #[test]
    fn test_reused_identity_to_unmonitored_path_drops_record() {
        let fx = Fixture::new();
        let resolver = Arc::new(FakeResolver::default());
        let reconciler = fx.reconciler(resolver.clone());

        let excluded_a = fx.path("excluded-a.log");
        let excluded_b = fx.path("excluded-b.log");
        fx.registry.put("9".into(), FileRecord::new(&excluded_a, 4));
        append(&excluded_b, "x\n");
        resolver.assign(&excluded_b, "9");

        let result = reconciler.handle(&Notification::created(&excluded_b)).unwrap();
        assert!(matches!(result, Reconciliation::Replaced { registered: false, .. }));
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_bootstrap_start_positions() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let a = fx.path("a.log");
        let b = fx.path("b.log");
        append(&a, "1\n2\n");
        append(&b, "1\n2\n3\n");

        assert_eq!(reconciler.bootstrap(&[a.clone()], true).unwrap(), 1);
        assert_eq!(reconciler.bootstrap(&[b.clone()], false).unwrap(), 1);

        let key_a = InodeResolver.resolve(&a).unwrap();
        let key_b = InodeResolver.resolve(&b).unwrap();
        assert_eq!(fx.registry.get(&key_a).unwrap().position, 2);
        assert_eq!(fx.registry.get(&key_b).unwrap().position, 3);
        // Only a.log's existing lines were read
        assert_eq!(fx.delivered().len(), 2);
    }

    #[test]
    fn test_bootstrap_resumes_known_file() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        append(&path, "seen\nunseen\n");
        let key = InodeResolver.resolve(&path).unwrap();
        fx.registry.put(key.clone(), FileRecord::new(&path, 1));

        assert_eq!(reconciler.bootstrap(&[path.clone()], false).unwrap(), 0);
        assert_eq!(fx.registry.get(&key).unwrap().position, 2);
        assert_eq!(fx.delivered()[0].0, "unseen");
    }

    #[test]
    fn test_held_record_is_never_read() {
        let fx = Fixture::new();
        let reconciler = fx.reconciler(Arc::new(InodeResolver));
        let path = fx.path("app.log");
        append(&path, "a\nb\n");
        let key = InodeResolver.resolve(&path).unwrap();
        fx.registry.put(key.clone(), FileRecord::held(&path));

        // Known key, so read_existing does not start it over from line 0
        assert_eq!(reconciler.bootstrap(&[path.clone()], true).unwrap(), 0);
        append(&path, "c\n");
        let result = reconciler.handle(&Notification::modified(&path)).unwrap();

        assert_eq!(result, Reconciliation::Appended { key: key.clone(), lines: 0 });
        assert_eq!(fx.registry.get(&key).unwrap(), FileRecord::held(&path));
        assert!(fx.delivered().is_empty());
    }
}
