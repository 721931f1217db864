// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::multiline::{Event, Headers};
use crate::sink::EventSink;

#[derive(Serialize)]
struct JsonEvent<'a> {
    body: std::borrow::Cow<'a, str>,
    headers: &'a Headers,
}

/// Writes each event as one JSON object per line to any writer.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl WriterSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for WriterSink<W> {
    fn deliver(&self, batch: Vec<Event>) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for event in &batch {
            let json = JsonEvent {
                body: event.body_lossy(),
                headers: &event.headers,
            };
            serde_json::to_writer(&mut *writer, &json)
                .map_err(|e| Error::Sink(format!("failed to encode event: {}", e)))?;
            writer
                .write_all(b"\n")
                .map_err(|e| Error::Sink(format!("failed to write event: {}", e)))?;
        }
        writer
            .flush()
            .map_err(|e| Error::Sink(format!("failed to flush events: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_json_lines() {
        let sink = WriterSink::new(Vec::new());
        let mut headers = Headers::new();
        headers.insert("file".to_string(), "/var/log/a.log".to_string());

        sink.deliver(vec![
            Event::new(b"first\n  at x".to_vec(), headers),
            Event::new(b"second".to_vec(), Headers::new()),
        ])
        .unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"body":"first\n  at x","headers":{"file":"/var/log/a.log"}}"#
        );
        assert_eq!(lines[1], r#"{"body":"second","headers":{}}"#);
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_sink_error() {
        let sink = WriterSink::new(BrokenWriter);
        let err = sink
            .deliver(vec![Event::new(b"x".to_vec(), Headers::new())])
            .unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
    }
}
