// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

/// Event headers. Ordered so serialized output is stable.
pub type Headers = BTreeMap<String, String>;

/// One raw line read from a tailed file, before multi-line classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    pub body: Vec<u8>,
    pub headers: Headers,
}

impl LineEvent {
    pub fn new(body: impl Into<Vec<u8>>, headers: Headers) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }

    /// Line carrying a single header, handy for building buffers by hand.
    pub fn with_header(body: impl Into<Vec<u8>>, name: &str, value: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert(name.to_string(), value.to_string());
        Self::new(body, headers)
    }
}

/// A finished event handed to the sink: either a standalone line or several
/// continuation lines joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub body: Vec<u8>,
    pub headers: Headers,
}

impl Event {
    pub fn new(body: impl Into<Vec<u8>>, headers: Headers) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }

    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<LineEvent> for Event {
    fn from(line: LineEvent) -> Self {
        Self {
            body: line.body,
            headers: line.headers,
        }
    }
}
