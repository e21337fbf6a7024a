use std::collections::VecDeque;
use std::io::{self, Write};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use crate::models::DEFAULT_SCROLLBACK;

/// Fixed-capacity history of output lines. Line 0 is always the oldest
/// retained line; appending past capacity evicts from the front.
#[derive(Debug)]
pub struct ScrollbackBuffer {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    lines: VecDeque<Vec<u8>>,
    capacity: usize,
    /// The last line has not seen its newline yet.
    open: bool,
}

impl Inner {
    fn push(&mut self, line: Vec<u8>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

impl ScrollbackBuffer {
    /// A zero capacity falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_SCROLLBACK } else { capacity };
        Self {
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity.min(4096)),
                capacity,
                open: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Append one complete line.
    pub fn append(&self, line: Vec<u8>) {
        let mut inner = self.lock();
        inner.push(line);
        inner.open = false;
    }

    /// Append raw output, splitting on `\n`. A trailing partial line is
    /// continued by the next call.
    pub fn append_bytes(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.lock();
        let mut parts = data.split(|b| *b == b'\n').peekable();
        while let Some(part) = parts.next() {
            let last = parts.peek().is_none();
            if inner.open {
                if let Some(line) = inner.lines.back_mut() {
                    line.extend_from_slice(part);
                }
            } else if !(last && part.is_empty()) {
                inner.push(part.to_vec());
            }

            if !last {
                if let Some(line) = inner.lines.back_mut() {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                inner.open = false;
            } else {
                inner.open = !part.is_empty() || inner.open;
            }
        }
    }

    pub fn line(&self, index: usize) -> Option<Vec<u8>> {
        self.lock().lines.get(index).cloned()
    }

    /// Lines in `range`, clipped to what is retained.
    pub fn lines(&self, range: Range<usize>) -> Vec<Vec<u8>> {
        let inner = self.lock();
        let end = range.end.min(inner.lines.len());
        if range.start >= end {
            return Vec::new();
        }
        inner.lines.range(range.start..end).cloned().collect()
    }

    /// The last `count` lines.
    pub fn tail(&self, count: usize) -> Vec<Vec<u8>> {
        let len = self.len();
        self.lines(len.saturating_sub(count)..len)
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.lines.clear();
        inner.open = false;
    }

    /// Every line, each followed by a newline.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        let inner = self.lock();
        for line in &inner.lines {
            out.write_all(line)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_keeps_capacity() {
        let buffer = ScrollbackBuffer::new(5);
        for i in 0..12 {
            buffer.append(format!("line {i}").into_bytes());
        }
        assert_eq!(buffer.len(), 5);
        // 12 appended, 7 evicted: index 0 is the 8th line appended.
        assert_eq!(buffer.line(0).unwrap(), b"line 7".to_vec());
        assert_eq!(buffer.line(4).unwrap(), b"line 11".to_vec());
        assert!(buffer.line(5).is_none());
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        assert_eq!(ScrollbackBuffer::new(0).capacity(), DEFAULT_SCROLLBACK);
    }

    #[test]
    fn test_append_bytes_splits_lines() {
        let buffer = ScrollbackBuffer::new(10);
        buffer.append_bytes(b"hello\r\nwor");
        buffer.append_bytes(b"ld\nnext\n");
        buffer.append_bytes(b"tail");

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.line(0).unwrap(), b"hello".to_vec());
        assert_eq!(buffer.line(1).unwrap(), b"world".to_vec());
        assert_eq!(buffer.line(2).unwrap(), b"next".to_vec());
        assert_eq!(buffer.line(3).unwrap(), b"tail".to_vec());
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let buffer = ScrollbackBuffer::new(10);
        buffer.append_bytes(b"a\n\nb\n");
        assert_eq!(buffer.lines(0..10), vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }

    #[test]
    fn test_lines_range_is_clipped() {
        let buffer = ScrollbackBuffer::new(10);
        for i in 0..4 {
            buffer.append(vec![b'0' + i]);
        }
        assert_eq!(buffer.lines(1..3), vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(buffer.lines(2..100).len(), 2);
        assert!(buffer.lines(5..8).is_empty());
        assert_eq!(buffer.tail(2), vec![b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_clear_and_write_to() {
        let buffer = ScrollbackBuffer::new(10);
        buffer.append_bytes(b"x\ny");
        let mut out = Vec::new();
        buffer.write_to(&mut out).unwrap();
        assert_eq!(out, b"x\ny\n".to_vec());

        buffer.clear();
        assert!(buffer.is_empty());
        buffer.append_bytes(b"z");
        assert_eq!(buffer.line(0).unwrap(), b"z".to_vec());
    }
}
