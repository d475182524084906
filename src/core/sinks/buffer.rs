// src/core/sinks/buffer.rs

use super::{LineTransform, OutputSink};
use crate::core::lock;
use anyhow::Result;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Buffer {
    text: String,
    /// Number of chars in `text`; kept alongside to avoid rescanning on every line.
    chars: usize,
    full: bool,
}

/// Collects process output into a string, one `\n`-terminated line per consumed line.
///
/// With `max_size > 0` the buffer never holds more than `max_size` characters: the line that
/// would overflow it is truncated to the remaining budget and everything after it is dropped.
pub struct BufferCollector {
    max_size: usize,
    transform: Option<LineTransform>,
    buffer: Mutex<Buffer>,
}

impl BufferCollector {
    /// A collector capped at `max_size` characters; `0` means unbounded.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            transform: None,
            buffer: Mutex::new(Buffer::default()),
        }
    }

    /// A collector without a size cap.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Rewrites every line before it is stored.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transform = Some(Box::new(transform));
        self
    }

    /// The cap in characters, `0` when unbounded.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Snapshot of the accumulated text.
    pub fn text(&self) -> String {
        lock(&self.buffer).text.clone()
    }

    /// Accumulated length in characters.
    pub fn len(&self) -> usize {
        lock(&self.buffer).chars
    }

    /// Whether nothing has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the size cap has been reached and further lines are dropped.
    pub fn is_full(&self) -> bool {
        lock(&self.buffer).full
    }

    fn append(&self, line: &str) {
        let mut buf = lock(&self.buffer);
        if buf.full {
            return;
        }
        let entry_chars = line.chars().count() + 1;
        if self.max_size == 0 || buf.chars + entry_chars <= self.max_size {
            buf.text.push_str(line);
            buf.text.push('\n');
            buf.chars += entry_chars;
            if self.max_size > 0 && buf.chars == self.max_size {
                buf.full = true;
            }
            return;
        }
        let budget = self.max_size.saturating_sub(buf.chars);
        let head: String = line.chars().take(budget).collect();
        buf.chars += head.chars().count();
        buf.text.push_str(&head);
        buf.full = true;
        log::trace!(
            "Output buffer reached its cap of {} chars, dropping further lines.",
            self.max_size
        );
    }
}

impl OutputSink for BufferCollector {
    fn consume(&self, line: &str) -> Result<()> {
        match &self.transform {
            Some(transform) => self.append(&transform(line)),
            None => self.append(line),
        }
        Ok(())
    }
}

impl Default for BufferCollector {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Display for BufferCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&lock(&self.buffer).text)
    }
}

impl fmt::Debug for BufferCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCollector")
            .field("max_size", &self.max_size)
            .field("len", &self.len())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_appends_lines_in_order() {
        let collector = BufferCollector::unbounded();
        for line in ["alpha", "beta", "", "gamma"] {
            collector.consume(line).unwrap();
        }
        assert_eq!(collector.text(), "alpha\nbeta\n\ngamma\n");
        assert_eq!(collector.len(), 18);
        assert!(!collector.is_full());
    }

    #[test]
    fn test_cap_truncates_overflowing_line_and_stops() {
        let collector = BufferCollector::new(10);
        collector.consume("abcd").unwrap(); // 5 chars with terminator
        collector.consume("efghijkl").unwrap(); // only 5 left
        collector.consume("more").unwrap();
        assert_eq!(collector.text(), "abcd\nefghi");
        assert_eq!(collector.len(), 10);
        assert!(collector.is_full());
    }

    #[test]
    fn test_cap_is_never_exceeded() {
        let collector = BufferCollector::new(64);
        for i in 0..1000 {
            collector.consume(&format!("line number {}", i)).unwrap();
            assert!(collector.len() <= 64);
        }
        assert_eq!(collector.len(), 64);
        assert_eq!(collector.text().chars().count(), 64);
    }

    #[test]
    fn test_cap_counts_chars_not_bytes() {
        let collector = BufferCollector::new(4);
        collector.consume("ñandú").unwrap();
        assert_eq!(collector.text(), "ñand");
    }

    #[test]
    fn test_exact_fit_marks_full() {
        let collector = BufferCollector::new(4);
        collector.consume("abc").unwrap();
        assert!(collector.is_full());
        collector.consume("d").unwrap();
        assert_eq!(collector.text(), "abc\n");
    }

    #[test]
    fn test_transform_is_applied_before_storing() {
        let collector = BufferCollector::new(0).with_transform(|l| l.to_uppercase());
        collector.consume("quiet").unwrap();
        assert_eq!(collector.to_string(), "QUIET\n");
    }
}
