// SPDX-License-Identifier: Apache-2.0

//! Downstream delivery of finished events.
//!
//! Delivery is synchronous and may block the draining thread; admission control
//! belongs to the sink, not to the coalescer. A failed delivery is reported as
//! [`Error::Sink`](crate::error::Error::Sink) and stops the source.

mod channel;
mod memory;
mod writer;

pub use channel::ChannelSink;
pub use memory::MemorySink;
pub use writer::WriterSink;

use crate::error::Result;
use crate::multiline::Event;

/// Accepts batches of finished events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, batch: Vec<Event>) -> Result<()>;
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn deliver(&self, batch: Vec<Event>) -> Result<()> {
        (**self).deliver(batch)
    }
}
