// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Runtime counters of a tail source. Read with [`TailStats::snapshot`].
#[derive(Debug, Default)]
pub struct TailStats {
    lines_read: AtomicU64,
    lines_discarded: AtomicU64,
    events_delivered: AtomicU64,
    batches_delivered: AtomicU64,
    entries_reaped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub lines_discarded: u64,
    pub events_delivered: u64,
    pub batches_delivered: u64,
    pub entries_reaped: u64,
}

impl TailStats {
    pub fn record_lines(&self, read: u64, discarded: u64) {
        self.lines_read.fetch_add(read, Ordering::Relaxed);
        self.lines_discarded.fetch_add(discarded, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, events: usize) {
        if events > 0 {
            self.events_delivered
                .fetch_add(events as u64, Ordering::Relaxed);
            self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reaped(&self, entries: usize) {
        self.entries_reaped
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_discarded: self.lines_discarded.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            entries_reaped: self.entries_reaped.load(Ordering::Relaxed),
        }
    }
}
