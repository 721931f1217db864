// SPDX-License-Identifier: Apache-2.0

//! The tail source: wires the registry, reconciler, tailer and coalescer together
//! and runs them until cancelled.
//!
//! Architecture:
//! - A notification thread applies watcher notifications one at a time. All of its
//!   file I/O is blocking, so it lives on a dedicated OS thread.
//! - Periodic tasks drain the multi-line buffer, reap stale registry entries and
//!   checkpoint positions.
//! - On cancellation every component finishes its current operation, then a final
//!   flush closes all pending records and a final checkpoint is written.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender, Recv};
use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::input::{GlobFilter, IdentityResolver, InodeResolver, LineObserver, LineTailer};
use crate::multiline::MultilineCoalescer;
use crate::persistence::JsonFileStore;
use crate::reaper::StaleEntryReaper;
use crate::reconciler::{Notification, Reconciliation, RotationReconciler};
use crate::registry::FileRegistry;
use crate::scheduler::PeriodicTask;
use crate::sink::EventSink;
use crate::stats::TailStats;
use crate::watcher::NativeWatcher;

/// How often the notification thread checks for cancellation while idle.
const NOTIFICATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct TailSource {
    config: TailConfig,
    registry: Arc<FileRegistry>,
    coalescer: Arc<MultilineCoalescer>,
    sink: Arc<dyn EventSink>,
    filter: Arc<GlobFilter>,
    resolver: Arc<dyn IdentityResolver>,
    observer: Option<Arc<dyn LineObserver>>,
    stats: Arc<TailStats>,
    store: Option<JsonFileStore>,
    notify_tx: BoundedSender<Notification>,
    notify_rx: BoundedReceiver<Notification>,
}

impl TailSource {
    /// Validate `config` and load persisted positions. Fails on configuration errors.
    pub fn new(config: TailConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let classifier = config.multiline.compile()?;
        let coalescer = MultilineCoalescer::new(
            classifier,
            config.source_header(),
            config.multiline.coalescer_options(),
        );
        let filter = GlobFilter::new(&config.include, &config.exclude)?;

        let store = config.position_path.as_ref().map(JsonFileStore::new);
        let registry = match &store {
            Some(store) => store.load_registry(),
            None => FileRegistry::new(),
        };

        let (notify_tx, notify_rx) = bounded_channel::bounded(config.notification_queue_size);

        Ok(Self {
            config,
            registry: Arc::new(registry),
            coalescer: Arc::new(coalescer),
            sink,
            filter: Arc::new(filter),
            resolver: Arc::new(InodeResolver),
            observer: None,
            stats: Arc::new(TailStats::default()),
            store,
            notify_tx,
            notify_rx,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sender for file-system notifications. Sends block while the queue is full.
    pub fn notifier(&self) -> BoundedSender<Notification> {
        self.notify_tx.clone()
    }

    /// Directories a watcher must observe to see every included file.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.filter.watch_roots()
    }

    /// Create a native watcher feeding this source, already watching every root.
    pub fn native_watcher(&self) -> Result<NativeWatcher> {
        let mut watcher = NativeWatcher::new(self.notifier())?;
        let roots = self.watch_roots();
        let watching = watcher.watch_all(&roots);
        info!(
            backend = watcher.backend_name(),
            watching,
            roots = roots.len(),
            "File watcher started"
        );
        Ok(watcher)
    }

    pub fn registry(&self) -> Arc<FileRegistry> {
        self.registry.clone()
    }

    /// Counters shared with the running source; take it before `start`.
    pub fn stats(&self) -> Arc<TailStats> {
        self.stats.clone()
    }

    /// Start the source. Everything runs inside one task of `task_set`, which completes
    /// after shutdown finished and yields the first fatal error, if any.
    pub fn start(self, task_set: &mut JoinSet<Result<()>>, cancel: &CancellationToken) {
        info!(
            include = ?self.config.include,
            exclude = ?self.config.exclude,
            multiline = self.coalescer_enabled(),
            read_existing = self.config.read_existing,
            tracked = self.registry.len(),
            "Starting tail source"
        );

        let cancel = cancel.clone();
        task_set.spawn(async move { self.run(cancel).await });
    }

    fn coalescer_enabled(&self) -> bool {
        self.config.multiline.continuation_pattern.is_some()
    }

    async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut tailer = LineTailer::new(
            self.registry.clone(),
            self.coalescer.clone(),
            self.sink.clone(),
            self.resolver.clone(),
            self.stats.clone(),
            self.config.max_line_length,
        );
        if let Some(header) = &self.config.base_name_header {
            tailer = tailer.with_base_name_header(header.clone());
        }
        if let Some(observer) = &self.observer {
            tailer = tailer.with_observer(observer.clone());
        }

        let reconciler = RotationReconciler::new(
            self.registry.clone(),
            Arc::new(tailer),
            self.filter.clone(),
            self.resolver.clone(),
        );

        let coordinator = NotificationLoop {
            reconciler,
            filter: self.filter.clone(),
            rx: self.notify_rx,
            read_existing: self.config.read_existing,
        };
        let loop_cancel = cancel.clone();
        let loop_handle = std::thread::spawn(move || coordinator.run(loop_cancel));

        let drain = {
            let coalescer = self.coalescer.clone();
            let sink = self.sink.clone();
            let stats = self.stats.clone();
            PeriodicTask::new("drain", self.config.drain_interval).run(cancel.clone(), move || {
                let report = coalescer.drain(sink.as_ref())?;
                stats.record_delivery(report.emitted);
                Ok(())
            })
        };

        let reap = {
            let reaper = StaleEntryReaper::new(
                self.registry.clone(),
                self.resolver.clone(),
                self.stats.clone(),
            );
            PeriodicTask::new("reap", self.config.reap_interval).run(cancel.clone(), move || {
                reaper.sweep();
                Ok(())
            })
        };

        let checkpoint = {
            let store = self.store.clone();
            let registry = self.registry.clone();
            let interval = self.config.checkpoint_interval;
            let cancel = cancel.clone();
            async move {
                match store {
                    Some(store) => {
                        PeriodicTask::new("checkpoint", interval)
                            .run(cancel, move || store.save(&registry))
                            .await
                    }
                    None => Ok(()),
                }
            }
        };

        let (drain, reap, checkpoint) = tokio::join!(drain, reap, checkpoint);
        debug!("Periodic tasks stopped, joining notification thread");

        let notifications = join_loop(loop_handle, self.config.shutdown_timeout).await;

        // Pending records were already consumed from their files, emit them now
        let final_flush = {
            let coalescer = self.coalescer.clone();
            let sink = self.sink.clone();
            let stats = self.stats.clone();
            tokio::task::spawn_blocking(move || {
                let report = coalescer.flush_all(sink.as_ref())?;
                stats.record_delivery(report.emitted);
                Ok::<_, Error>(report)
            })
            .await
            .map_err(|e| Error::Task(format!("final flush panicked: {}", e)))
            .and_then(|r| r)
        };
        match &final_flush {
            Ok(report) => debug!(emitted = report.emitted, "Final flush complete"),
            Err(e) => error!("Final flush failed: {}", e),
        }

        if let Some(store) = &self.store {
            match store.save(&self.registry) {
                Ok(()) => debug!(path = ?store.path(), "Final checkpoint written"),
                Err(e) => warn!("Final checkpoint failed: {}", e),
            }
        }

        let stats = self.stats.snapshot();
        info!(
            lines_read = stats.lines_read,
            lines_discarded = stats.lines_discarded,
            events_delivered = stats.events_delivered,
            "Tail source stopped"
        );

        notifications?;
        drain?;
        reap?;
        checkpoint?;
        final_flush.map(|_| ())
    }
}

async fn join_loop(handle: JoinHandle<Result<()>>, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || handle.join())).await
    {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(_))) => {
            error!("Notification thread panicked");
            Err(Error::Task("notification thread panicked".to_string()))
        }
        Ok(Err(e)) => Err(Error::Task(format!("failed to join notification thread: {}", e))),
        Err(_) => {
            warn!("Timeout waiting for notification thread to stop");
            Ok(())
        }
    }
}

/// Applies notifications in arrival order on a dedicated thread.
struct NotificationLoop {
    reconciler: RotationReconciler,
    filter: Arc<GlobFilter>,
    rx: BoundedReceiver<Notification>,
    read_existing: bool,
}

impl NotificationLoop {
    fn run(self, cancel: CancellationToken) -> Result<()> {
        let result = self.process(&cancel);
        if let Err(e) = &result {
            error!("Notification processing stopped on fatal error: {}", e);
            cancel.cancel();
        }
        debug!("Notification thread stopped");
        result
    }

    fn process(&self, cancel: &CancellationToken) -> Result<()> {
        let existing = match self.filter.find_files() {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Failed to scan for existing files: {}", e);
                Vec::new()
            }
        };
        self.reconciler.bootstrap(&existing, self.read_existing)?;

        while !cancel.is_cancelled() {
            let notification = match self.rx.recv_timeout(NOTIFICATION_POLL_INTERVAL) {
                Recv::Item(n) => n,
                Recv::Timeout => continue,
                Recv::Disconnected => break,
            };

            match self.reconciler.handle(&notification) {
                Ok(Reconciliation::Ignored) => {}
                Ok(outcome) => debug!(?outcome, "Notification applied"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(path = ?notification.path, "Failed to apply notification: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::io::Write;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> TailConfig {
        TailConfig {
            include: vec![format!("{}/*.log", dir.path().display())],
            drain_interval: Duration::from_millis(20),
            reap_interval: Duration::from_millis(50),
            checkpoint_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let sink = Arc::new(MemorySink::new());
        let err = TailSource::new(TailConfig::default(), sink.clone()).err().unwrap();
        assert!(err.is_fatal());

        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.multiline.continuation_pattern = Some("(".to_string());
        assert!(matches!(TailSource::new(config, sink), Err(Error::Regex(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tails_notified_file_and_checkpoints_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let positions = dir.path().join("positions.json");
        let mut config = config(&dir);
        config.position_path = Some(positions.clone());
        config.read_existing = true;

        let sink = Arc::new(MemorySink::new());
        let source = TailSource::new(config, sink.clone()).unwrap();
        let notifier = source.notifier();
        let registry = source.registry();
        let stats = source.stats();

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        source.start(&mut tasks, &cancel);

        let path = dir.path().join("app.log");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"one\ntwo\n").unwrap();
        notifier
            .send(Notification::created(path.clone()))
            .await
            .unwrap();

        assert!(wait_until(|| sink.bodies().len() == 2).await);
        assert_eq!(sink.bodies(), vec!["one", "two"]);

        cancel.cancel();
        tasks.join_next().await.unwrap().unwrap().unwrap();

        let saved = JsonFileStore::new(&positions).load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1.position, 2);
        assert_eq!(registry.len(), 1);

        let counters = stats.snapshot();
        assert_eq!(counters.lines_read, 2);
        assert_eq!(counters.events_delivered, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_flushes_pending_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "Exception: boom\n  at foo\n").unwrap();

        let mut config = config(&dir);
        config.read_existing = true;
        config.multiline.continuation_pattern = Some(r"^(Exception|\s+at )".to_string());

        let sink = Arc::new(MemorySink::new());
        let source = TailSource::new(config, sink.clone()).unwrap();
        let registry = source.registry();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        source.start(&mut tasks, &cancel);

        assert!(wait_until(|| registry.len() == 1).await);
        // The record stays open until shutdown
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.bodies().is_empty());

        cancel.cancel();
        tasks.join_next().await.unwrap().unwrap().unwrap();
        assert_eq!(sink.bodies(), vec!["Exception: boom\n  at foo"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sink_failure_stops_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line\n").unwrap();

        let mut config = config(&dir);
        config.read_existing = true;

        let sink = Arc::new(MemorySink::new());
        sink.fail_deliveries(true);
        let source = TailSource::new(config, sink.clone()).unwrap();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        source.start(&mut tasks, &cancel);

        let result = tokio::time::timeout(Duration::from_secs(5), tasks.join_next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Sink(_))));
        assert!(cancel.is_cancelled());
    }
}
