// SPDX-License-Identifier: Apache-2.0

//! Fixed-interval background work that stops cooperatively.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Runs a blocking operation every `interval` until cancelled.
///
/// An operation in progress always runs to completion; cancellation is only observed
/// between runs. A fatal error cancels the shared token, so sibling tasks stop too,
/// and is returned. Other errors are logged and the schedule continues.
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
}

impl PeriodicTask {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self { name, interval }
    }

    pub async fn run<F>(self, cancel: CancellationToken, op: F) -> Result<()>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        debug!(task = self.name, interval = ?self.interval, "Periodic task started");
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    let op = op.clone();
                    let result = tokio::task::spawn_blocking(move || op())
                        .await
                        .map_err(|e| Error::Task(format!("{} task panicked: {}", self.name, e)))
                        .and_then(|r| r);

                    if let Err(e) = result {
                        if e.is_fatal() {
                            error!(task = self.name, "Fatal error, stopping: {}", e);
                            cancel.cancel();
                            return Err(e);
                        }
                        warn!(task = self.name, "Periodic run failed: {}", e);
                    }
                }
            }
        }

        debug!(task = self.name, "Periodic task stopped");
        Ok(())
    }
}
