// SPDX-License-Identifier: Apache-2.0

//! Configuration for a tail source.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::multiline::{CoalescerOptions, LineClassifier, SourceHeader};

/// Multi-line reassembly settings.
#[derive(Debug, Clone)]
pub struct MultilineConfig {
    /// Pattern recognizing continuation lines (record starts in negate mode).
    /// Unset disables reassembly: every line is its own event.
    pub continuation_pattern: Option<String>,
    /// Invert the continuation pattern
    pub negate: bool,
    /// Pattern recognizing the first line of a multi-line record
    pub first_line_pattern: Option<String>,
    /// Composite events take their headers from the first fragment instead of the last
    pub assign_headers_to_previous: bool,
    /// Close every pending record at the end of each drain cycle
    pub flush_entire_buffer: bool,
    /// Buffered line count above which a drain is forced mid-tail
    pub buffer_capacity: usize,
}

impl Default for MultilineConfig {
    fn default() -> Self {
        let options = CoalescerOptions::default();
        Self {
            continuation_pattern: None,
            negate: false,
            first_line_pattern: None,
            assign_headers_to_previous: options.assign_headers_to_previous,
            flush_entire_buffer: options.flush_entire_buffer,
            buffer_capacity: options.buffer_capacity,
        }
    }
}

impl MultilineConfig {
    /// Compile the patterns. Each regex is built exactly once here.
    pub fn compile(&self) -> Result<LineClassifier> {
        match &self.continuation_pattern {
            None => Ok(LineClassifier::disabled()),
            Some(pattern) => {
                LineClassifier::new(pattern, self.negate, self.first_line_pattern.as_deref())
            }
        }
    }

    pub fn coalescer_options(&self) -> CoalescerOptions {
        CoalescerOptions {
            assign_headers_to_previous: self.assign_headers_to_previous,
            flush_entire_buffer: self.flush_entire_buffer,
            buffer_capacity: self.buffer_capacity,
        }
    }
}

/// Configuration for the tail source
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,
    /// Glob patterns for files to exclude
    pub exclude: Vec<String>,
    /// Header carrying the full source path, when set
    pub file_header: Option<String>,
    /// Header carrying the source file's base name, when set
    pub base_name_header: Option<String>,
    /// Lines longer than this many bytes are counted but never emitted
    pub max_line_length: usize,
    /// Tail pre-existing files from their first line at startup
    pub read_existing: bool,
    pub multiline: MultilineConfig,
    /// Where the registry snapshot is kept; unset disables persistence
    pub position_path: Option<PathBuf>,
    pub drain_interval: Duration,
    pub reap_interval: Duration,
    pub checkpoint_interval: Duration,
    /// Capacity of the queue between the watcher and the reconciler
    pub notification_queue_size: usize,
    /// How long shutdown waits for background tasks to stop
    pub shutdown_timeout: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            file_header: None,
            base_name_header: None,
            max_line_length: 65536,
            read_existing: false,
            multiline: MultilineConfig::default(),
            position_path: None,
            drain_interval: Duration::from_millis(500),
            reap_interval: Duration::from_secs(5),
            checkpoint_interval: Duration::from_secs(1),
            notification_queue_size: 1024,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl TailConfig {
    /// Validate the configuration, including that every pattern compiles.
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::Config(
                "At least one include pattern must be specified".to_string(),
            ));
        }
        if self.max_line_length == 0 {
            return Err(Error::Config(
                "Maximum line length must be greater than zero".to_string(),
            ));
        }
        if self.multiline.buffer_capacity == 0 {
            return Err(Error::Config(
                "Multi-line buffer capacity must be greater than zero".to_string(),
            ));
        }
        for (option, header) in [
            ("file header", &self.file_header),
            ("base name header", &self.base_name_header),
        ] {
            if matches!(header, Some(name) if name.is_empty()) {
                return Err(Error::Config(format!("The {} name must not be empty", option)));
            }
        }
        if let (Some(file), Some(base)) = (&self.file_header, &self.base_name_header) {
            if file == base {
                return Err(Error::Config(format!(
                    "File header and base name header must differ, both are '{}'",
                    file
                )));
            }
        }
        if self.multiline.first_line_pattern.is_some()
            && self.multiline.continuation_pattern.is_none()
        {
            return Err(Error::Config(
                "A first-line pattern requires a continuation pattern".to_string(),
            ));
        }

        self.multiline.compile().map(|_| ())
    }

    /// Header that tracks which file a buffered line came from.
    pub fn source_header(&self) -> SourceHeader {
        match &self.file_header {
            Some(name) => SourceHeader::visible(name.clone()),
            None => SourceHeader::synthetic(),
        }
    }
}
