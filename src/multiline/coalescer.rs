// SPDX-License-Identifier: Apache-2.0

//! Buffers raw line events and turns them into finished events.
//!
//! A drain cycle classifies a fixed snapshot of the buffer in arrival order.
//! Standalone lines are emitted as they are; continuation lines collect into one
//! pending set per source file until a standalone line (or a first-line match) from
//! the same file closes the set. Sets that are not closed stay in the buffer and are
//! classified again on the next cycle, so fragment order is preserved.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::Result;
use crate::multiline::classifier::{LineClassifier, LineKind};
use crate::multiline::event::{Event, Headers, LineEvent};
use crate::sink::EventSink;

/// Header used to group fragments by source file when the caller did not ask for one.
pub const SYNTHETIC_SOURCE_HEADER: &str = "__tailfold_source_file";

/// Header carrying the source file of each line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHeader {
    name: String,
    visible: bool,
}

impl SourceHeader {
    /// A header the caller asked for; it is kept on emitted events.
    pub fn visible(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
        }
    }

    /// Internal placeholder, stripped before delivery.
    pub fn synthetic() -> Self {
        Self {
            name: SYNTHETIC_SOURCE_HEADER.to_string(),
            visible: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerOptions {
    /// Composite events take the headers of their first fragment (true) or last (false).
    pub assign_headers_to_previous: bool,
    /// Close every pending set at the end of each drain cycle.
    pub flush_entire_buffer: bool,
    /// Buffered line count above which the tailer forces a drain.
    pub buffer_capacity: usize,
}

impl Default for CoalescerOptions {
    fn default() -> Self {
        Self {
            assign_headers_to_previous: true,
            flush_entire_buffer: false,
            buffer_capacity: 1000,
        }
    }
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events handed to the sink.
    pub emitted: usize,
    /// Lines still buffered as pending fragments.
    pub retained: usize,
}

#[derive(Debug, Default)]
struct Buffer {
    lines: Vec<LineEvent>,
    /// Lines pushed since the last full drain cycle.
    fresh: usize,
}

#[derive(Debug)]
pub struct MultilineCoalescer {
    classifier: LineClassifier,
    source_header: SourceHeader,
    options: CoalescerOptions,
    buffer: Mutex<Buffer>,
}

impl MultilineCoalescer {
    pub fn new(
        classifier: LineClassifier,
        source_header: SourceHeader,
        options: CoalescerOptions,
    ) -> Self {
        Self {
            classifier,
            source_header,
            options,
            buffer: Mutex::new(Buffer::default()),
        }
    }

    pub fn source_header(&self) -> &SourceHeader {
        &self.source_header
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line. Returns true once more than `buffer_capacity` lines arrived
    /// since the last drain cycle; fragments retained by earlier cycles don't count.
    pub fn push(&self, line: LineEvent) -> bool {
        let mut buffer = self.lock();
        buffer.lines.push(line);
        buffer.fresh += 1;
        buffer.fresh > self.options.buffer_capacity
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    /// Run one drain cycle with the configured flush policy.
    pub fn drain(&self, sink: &dyn EventSink) -> Result<DrainReport> {
        self.drain_cycle(sink, None, self.options.flush_entire_buffer)
    }

    /// Run one drain cycle that closes every pending set, used at shutdown.
    pub fn flush_all(&self, sink: &dyn EventSink) -> Result<DrainReport> {
        self.drain_cycle(sink, None, true)
    }

    /// Emit everything buffered for `source` and close its pending set. Lines of
    /// other files are left alone.
    pub fn flush_source(&self, source: &str, sink: &dyn EventSink) -> Result<DrainReport> {
        self.drain_cycle(sink, Some(source), true)
    }

    fn source_of<'a>(&self, line: &'a LineEvent) -> &'a str {
        line.headers
            .get(self.source_header.name())
            .map(String::as_str)
            .unwrap_or("")
    }

    fn drain_cycle(
        &self,
        sink: &dyn EventSink,
        only: Option<&str>,
        flush_pending: bool,
    ) -> Result<DrainReport> {
        // Held for the whole cycle: lines pushed meanwhile wait for the next one
        let mut guard = self.lock();
        let buffer = &mut *guard;
        if only.is_none() {
            buffer.fresh = 0;
        }
        if buffer.lines.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut pending: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut emitted: Vec<Event> = Vec::new();
        let mut finished: Vec<usize> = Vec::new();

        for (index, line) in buffer.lines.iter().enumerate() {
            let source = self.source_of(line);
            if only.is_some_and(|only| only != source) {
                continue;
            }

            match self.classifier.classify(&line.body) {
                LineKind::Simple => {
                    if let Some(set) = pending.remove(source) {
                        emitted.push(self.join(&buffer.lines, &set));
                        finished.extend(set);
                    }
                    emitted.push(self.finish(line.body.clone(), line.headers.clone()));
                    finished.push(index);
                }
                LineKind::FirstLine => {
                    if let Some(set) = pending.remove(source) {
                        emitted.push(self.join(&buffer.lines, &set));
                        finished.extend(set);
                    }
                    pending.entry(source).or_default().push(index);
                }
                LineKind::Continuation => {
                    pending.entry(source).or_default().push(index);
                }
            }
        }

        let mut sets: Vec<Vec<usize>> = pending.into_values().collect();
        if flush_pending {
            sets.sort_by_key(|set| set[0]);
            for set in sets {
                emitted.push(self.join(&buffer.lines, &set));
                finished.extend(set);
            }
        }

        let emitted_count = emitted.len();
        let delivery = if emitted.is_empty() {
            Ok(())
        } else {
            sink.deliver(emitted)
        };

        // Indices shift on removal, so remove from the highest down
        finished.sort_unstable();
        for index in finished.into_iter().rev() {
            buffer.lines.remove(index);
        }
        buffer.fresh = buffer.fresh.min(buffer.lines.len());

        let report = DrainReport {
            emitted: emitted_count,
            retained: buffer.lines.len(),
        };

        match delivery {
            Ok(()) => {
                debug!(
                    emitted = report.emitted,
                    retained = report.retained,
                    "Drain cycle finished"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(lost = emitted_count, "Drain cycle failed to deliver its batch: {}", e);
                Err(e)
            }
        }
    }

    /// Join a pending set into one event, in buffer order.
    fn join(&self, buffer: &[LineEvent], set: &[usize]) -> Event {
        let mut body = Vec::new();
        for (i, &index) in set.iter().enumerate() {
            if i > 0 {
                body.push(b'\n');
            }
            body.extend_from_slice(&buffer[index].body);
        }

        let donor = if self.options.assign_headers_to_previous {
            set[0]
        } else {
            set[set.len() - 1]
        };

        self.finish(body, buffer[donor].headers.clone())
    }

    fn finish(&self, body: Vec<u8>, mut headers: Headers) -> Event {
        if !self.source_header.is_visible() {
            headers.remove(self.source_header.name());
        }
        Event::new(body, headers)
    }
}
