// SPDX-License-Identifier: Apache-2.0

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender};
use crate::error::{Error, Result};
use crate::multiline::Event;
use crate::sink::EventSink;

/// Hands batches to an async consumer through a bounded channel.
///
/// A full channel blocks the drain (backpressure); a dropped receiver is fatal.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: BoundedSender<Vec<Event>>,
}

impl ChannelSink {
    pub fn new(tx: BoundedSender<Vec<Event>>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end for the consumer.
    pub fn bounded(size: usize) -> (Self, BoundedReceiver<Vec<Event>>) {
        let (tx, rx) = bounded_channel::bounded(size);
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, batch: Vec<Event>) -> Result<()> {
        self.tx
            .send_blocking(batch)
            .map_err(|e| Error::Sink(format!("event channel: {}", e)))
    }
}
