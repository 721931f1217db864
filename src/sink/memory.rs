// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::multiline::Event;
use crate::sink::EventSink;

/// In-memory sink that records every delivered batch. Can be switched to fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Event>>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<Event>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent deliveries fail (or succeed again).
    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.lock().clone()
    }

    /// All delivered events flattened in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.lock().iter().flatten().cloned().collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.lock()
            .iter()
            .flatten()
            .map(|e| e.body_lossy().into_owned())
            .collect()
    }
}

impl EventSink for MemorySink {
    fn deliver(&self, batch: Vec<Event>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Sink(format!(
                "memory sink rejected batch of {} events",
                batch.len()
            )));
        }
        self.lock().push(batch);
        Ok(())
    }
}
