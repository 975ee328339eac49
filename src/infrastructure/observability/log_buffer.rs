//! Bounded in-memory capture of rendered log lines, backing `GET /logs`.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub seq: u64,
    pub line: String,
}

struct BufferState {
    next_seq: u64,
    lines: VecDeque<LogEntry>,
}

/// Ring buffer of the most recent rendered log lines. Cloneable handle;
/// also a `MakeWriter` so it can be installed as a subscriber layer.
#[derive(Clone)]
pub struct LogBuffer {
    state: Arc<Mutex<BufferState>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState {
                next_seq: 0,
                lines: VecDeque::with_capacity(capacity),
            })),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let seq = state.next_seq;
        state.next_seq += 1;
        if state.lines.len() == self.capacity {
            state.lines.pop_front();
        }
        state.lines.push_back(LogEntry { seq, line });
    }

    /// Entries with `seq > since`, oldest first.
    pub fn since(&self, since: Option<u64>) -> Vec<LogEntry> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .lines
            .iter()
            .filter(|e| since.is_none_or(|s| e.seq > s))
            .cloned()
            .collect()
    }
}

pub struct LogBufferWriter {
    buffer: LogBuffer,
    pending: Vec<u8>,
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.buffer
                .push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
            self.buffer.push(line);
            self.pending.clear();
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            buffer: self.clone(),
            pending: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn capacity_is_bounded_and_seq_monotone() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        let entries = buffer.since(None);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].line, "line 2");
        assert_eq!(entries[2].seq, 4);
    }

    #[test]
    fn since_filters_older_entries() {
        let buffer = LogBuffer::new(10);
        buffer.push("a".to_string());
        buffer.push("b".to_string());
        buffer.push("c".to_string());
        let entries = buffer.since(Some(1));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].line, "c");
    }

    #[test]
    fn writer_splits_lines() {
        let buffer = LogBuffer::new(10);
        let mut writer = buffer.make_writer();
        writer.write_all(b"first line\nsecond").unwrap();
        writer.write_all(b" half\n").unwrap();
        let entries = buffer.since(None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].line, "second half");
    }
}
