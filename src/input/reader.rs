// SPDX-License-Identifier: Apache-2.0

//! Incremental line reader.
//!
//! Positions are line offsets: a pass skips the lines already consumed and emits
//! one event per complete (`\n` terminated) line after them. An unterminated tail
//! fragment is left in place until its newline arrives.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::input::{IdentityKey, IdentityResolver};
use crate::multiline::{Headers, LineEvent, MultilineCoalescer};
use crate::registry::FileRegistry;
use crate::sink::EventSink;
use crate::stats::TailStats;

/// Called once for every raw line read, including lines later discarded as too long.
pub trait LineObserver: Send + Sync {
    fn on_line(&self, path: &Path, len: usize);
}

/// Result of one tail pass over a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailOutcome {
    /// Complete lines consumed, including discarded ones.
    pub lines: u64,
    /// Lines dropped for exceeding the maximum length.
    pub discarded: u64,
    /// The file held fewer lines than the recorded position and was re-read from the start.
    pub truncated: bool,
}

pub struct LineTailer {
    registry: Arc<FileRegistry>,
    coalescer: Arc<MultilineCoalescer>,
    sink: Arc<dyn EventSink>,
    resolver: Arc<dyn IdentityResolver>,
    observer: Option<Arc<dyn LineObserver>>,
    stats: Arc<TailStats>,
    max_line_length: usize,
    base_name_header: Option<String>,
}

impl LineTailer {
    pub fn new(
        registry: Arc<FileRegistry>,
        coalescer: Arc<MultilineCoalescer>,
        sink: Arc<dyn EventSink>,
        resolver: Arc<dyn IdentityResolver>,
        stats: Arc<TailStats>,
        max_line_length: usize,
    ) -> Self {
        Self {
            registry,
            coalescer,
            sink,
            resolver,
            observer: None,
            stats,
            max_line_length,
            base_name_header: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attach the file's base name under `header` on every line.
    pub fn with_base_name_header(mut self, header: impl Into<String>) -> Self {
        self.base_name_header = Some(header.into());
        self
    }

    /// Read the lines appended to `key`'s file since its recorded position.
    pub fn tail(&self, key: &IdentityKey) -> Result<TailOutcome> {
        match self.registry.get(key) {
            Some(record) if !record.held => {
                self.tail_at(key, &record.path, &record.path, record.position)
            }
            _ => Ok(TailOutcome::default()),
        }
    }

    /// Drain `key` by reading through `read_path` while attributing lines to the
    /// record's stored path. Used when a rename was observed and the stored path
    /// may already belong to a different file.
    pub fn tail_via(&self, key: &IdentityKey, read_path: &Path) -> Result<TailOutcome> {
        match self.registry.get(key) {
            Some(record) if !record.held => {
                self.tail_at(key, read_path, &record.path, record.position)
            }
            _ => Ok(TailOutcome::default()),
        }
    }

    /// Finish the multi-line record still open for `source_path`, if any.
    ///
    /// Called once a path stops belonging to the file whose lines were buffered
    /// under it, so later lines written at that path can never join the record.
    pub fn close_pending(&self, source_path: &Path) -> Result<usize> {
        let report = self
            .coalescer
            .flush_source(&source_value(source_path), self.sink.as_ref())?;
        self.stats.record_delivery(report.emitted);
        Ok(report.emitted)
    }

    fn tail_at(
        &self,
        key: &IdentityKey,
        read_path: &Path,
        source_path: &Path,
        position: u64,
    ) -> Result<TailOutcome> {
        let file = match File::open(read_path) {
            Ok(f) => f,
            Err(e) => {
                debug!(key = %key, path = ?read_path, "Unable to open file for tailing: {}", e);
                return Ok(TailOutcome::default());
            }
        };

        match self.resolver.resolve_open(read_path, &file) {
            Ok(current) if current == *key => {}
            Ok(current) => {
                debug!(
                    key = %key,
                    current = %current,
                    path = ?read_path,
                    "Path now belongs to a different file, skipping tail"
                );
                return Ok(TailOutcome::default());
            }
            Err(e) => {
                debug!(key = %key, path = ?read_path, "Unable to verify file identity: {}", e);
                return Ok(TailOutcome::default());
            }
        }

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        let skipped = match skip_lines(&mut reader, position, &mut line) {
            Ok(n) => n,
            Err(e) => {
                warn!(key = %key, path = ?read_path, "Failed to seek to position {}: {}", position, e);
                return Ok(TailOutcome::default());
            }
        };

        let mut outcome = TailOutcome::default();
        if skipped < position {
            warn!(
                key = %key,
                path = ?read_path,
                position,
                lines_present = skipped,
                "File shrank below recorded position, re-reading from the start"
            );
            if let Err(e) = reader.seek(SeekFrom::Start(0)) {
                warn!(key = %key, path = ?read_path, "Failed to rewind truncated file: {}", e);
                return Ok(TailOutcome::default());
            }
            outcome.truncated = true;
        }

        let headers = self.headers_for(source_path);
        let result = self.emit_lines(&mut reader, read_path, &headers, &mut line, &mut outcome);

        // Lines pushed before a failure are buffered, so the position covers them too
        if outcome.truncated {
            self.registry.rewind(key, outcome.lines);
        } else if outcome.lines > 0 {
            self.registry.advance(key, outcome.lines);
        }
        self.stats.record_lines(outcome.lines, outcome.discarded);

        if outcome.lines > 0 {
            debug!(
                key = %key,
                path = ?source_path,
                lines = outcome.lines,
                discarded = outcome.discarded,
                "Tailed file"
            );
        }

        result.map(|_| outcome)
    }

    fn emit_lines(
        &self,
        reader: &mut BufReader<File>,
        read_path: &Path,
        headers: &Headers,
        line: &mut Vec<u8>,
        outcome: &mut TailOutcome,
    ) -> Result<()> {
        loop {
            line.clear();
            let n = match reader.read_until(b'\n', line) {
                Ok(n) => n,
                Err(e) => {
                    warn!(path = ?read_path, "Error reading file, stopping this pass: {}", e);
                    return Ok(());
                }
            };
            if n == 0 || line.last() != Some(&b'\n') {
                return Ok(());
            }

            let body = trim_line_ending(line);
            if let Some(observer) = &self.observer {
                observer.on_line(read_path, body.len());
            }
            outcome.lines += 1;

            if body.len() > self.max_line_length {
                outcome.discarded += 1;
                debug!(
                    path = ?read_path,
                    len = body.len(),
                    max = self.max_line_length,
                    "Discarding line over maximum length"
                );
                continue;
            }

            let over_capacity = self
                .coalescer
                .push(LineEvent::new(body.to_vec(), headers.clone()));
            if over_capacity {
                let report = self.coalescer.drain(self.sink.as_ref())?;
                self.stats.record_delivery(report.emitted);
            }
        }
    }

    fn headers_for(&self, source_path: &Path) -> Headers {
        let mut headers = Headers::new();
        headers.insert(
            self.coalescer.source_header().name().to_string(),
            source_value(source_path),
        );
        if let Some(name) = &self.base_name_header {
            let base = source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            headers.insert(name.clone(), base);
        }
        headers
    }
}

/// Value of the source header for lines read under `path`.
fn source_value(path: &Path) -> String {
    path.display().to_string()
}

/// Skip up to `count` complete lines, returning how many were actually present.
fn skip_lines<R: BufRead>(reader: &mut R, count: u64, scratch: &mut Vec<u8>) -> io::Result<u64> {
    let mut skipped = 0;
    while skipped < count {
        scratch.clear();
        let n = reader.read_until(b'\n', scratch)?;
        if n == 0 || scratch.last() != Some(&b'\n') {
            break;
        }
        skipped += 1;
    }
    Ok(skipped)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Count the complete lines currently in a file.
pub fn count_lines(path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut scratch = Vec::new();
    skip_lines(&mut reader, u64::MAX, &mut scratch)
}
