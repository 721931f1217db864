// SPDX-License-Identifier: Apache-2.0

use regex::bytes::Regex;

use crate::error::Result;

/// How a buffered line relates to the records around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Self-contained record.
    Simple,
    /// Starts a new multi-line record; anything pending for the same file is finished first.
    FirstLine,
    /// Belongs to the record currently pending for its file.
    Continuation,
}

/// Classifies line bodies with regexes compiled once up front.
#[derive(Debug, Clone, Default)]
pub struct LineClassifier {
    continuation: Option<Regex>,
    negate: bool,
    first_line: Option<Regex>,
}

impl LineClassifier {
    /// Classifier that treats every line as standalone.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(continuation: &str, negate: bool, first_line: Option<&str>) -> Result<Self> {
        Ok(Self {
            continuation: Some(Regex::new(continuation)?),
            negate,
            first_line: first_line.map(Regex::new).transpose()?,
        })
    }

    /// By default a line is simple when the continuation pattern does not match it.
    /// In negate mode the pattern recognizes record starts, so a line is simple only
    /// when it matches.
    pub fn is_simple(&self, body: &[u8]) -> bool {
        match &self.continuation {
            None => true,
            Some(re) => re.is_match(body) == self.negate,
        }
    }

    pub fn classify(&self, body: &[u8]) -> LineKind {
        if self.is_simple(body) {
            return LineKind::Simple;
        }
        match &self.first_line {
            Some(re) if re.is_match(body) => LineKind::FirstLine,
            _ => LineKind::Continuation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_classifier_is_always_simple() {
        let c = LineClassifier::disabled();
        assert_eq!(c.classify(b"  at com.example.Foo"), LineKind::Simple);
    }

    #[test]
    fn test_continuation_pattern() {
        let c = LineClassifier::new(r"^(\s+at |Caused by:|\S+Exception)", false, None).unwrap();
        assert_eq!(c.classify(b"GET /index.html 200"), LineKind::Simple);
        assert_eq!(c.classify(b"java.lang.IllegalStateException: x"), LineKind::Continuation);
        assert_eq!(c.classify(b"    at com.example.Foo.bar"), LineKind::Continuation);
    }

    #[test]
    fn test_negate_mode_anchors_on_timestamps() {
        let c = LineClassifier::new(r"^\d{4}-\d{2}-\d{2}", true, None).unwrap();
        assert_eq!(c.classify(b"2024-01-01 12:00:00 INFO started"), LineKind::Simple);
        assert_eq!(c.classify(b"    at com.example.Foo.bar"), LineKind::Continuation);
    }

    #[test]
    fn test_first_line_pattern() {
        let c = LineClassifier::new(r"^(\s+at |\S+Exception)", false, Some(r"^\S+Exception")).unwrap();
        assert_eq!(c.classify(b"java.io.IOException: boom"), LineKind::FirstLine);
        assert_eq!(c.classify(b"    at a.b.C.d"), LineKind::Continuation);
        assert_eq!(c.classify(b"plain"), LineKind::Simple);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(LineClassifier::new("(unclosed", false, None).is_err());
        assert!(LineClassifier::new("ok", false, Some("[")).is_err());
    }

    #[test]
    fn test_non_utf8_body() {
        let c = LineClassifier::new(r"^\s+", false, None).unwrap();
        assert_eq!(c.classify(b"  \xff\xfe"), LineKind::Continuation);
        assert_eq!(c.classify(b"\xff\xfe"), LineKind::Simple);
    }
}
