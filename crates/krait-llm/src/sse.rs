//! Incremental wire scanners: SSE records and newline-delimited lines.
//!
//! Both scanners operate on raw bytes so a chunk boundary may fall inside
//! a multi-byte UTF-8 sequence; the incomplete tail stays buffered until
//! the next chunk arrives.

/// One parsed SSE record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseRecord {
    /// `event:` field, if present.
    pub event: Option<String>,
    /// Joined `data:` lines (multi-line data joined with `\n`).
    pub data: String,
}

/// Incremental SSE record parser.
///
/// Records are separated by a blank line. `event:` and `data:` fields are
/// recognized; comments (`:`) and other fields (`id:`, `retry:`) are
/// ignored. A record split at any byte boundary resumes on the next push.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Fresh parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk, returning all records completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(end) = find_record_end(&self.buffer) {
            let record_bytes: Vec<u8> = self.buffer.drain(..end.consumed).collect();
            let text = String::from_utf8_lossy(&record_bytes[..end.record_len]);
            if let Some(record) = parse_record(&text) {
                records.push(record);
            }
        }
        records
    }

    /// Parse whatever remains in the buffer as a final record (streams
    /// that end without a trailing blank line).
    pub fn finish(&mut self) -> Option<SseRecord> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&bytes);
        parse_record(&text)
    }

    /// Bytes currently buffered (diagnostics).
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

struct RecordEnd {
    /// Length of the record content (before the separator).
    record_len: usize,
    /// Bytes to drain including the separator.
    consumed: usize,
}

/// Find the first record separator (`\n\n` or `\r\n\r\n`).
fn find_record_end(buffer: &[u8]) -> Option<RecordEnd> {
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == b'\n' && buffer[i + 1] == b'\n' {
            return Some(RecordEnd {
                record_len: i,
                consumed: i + 2,
            });
        }
        if i + 3 < buffer.len() && &buffer[i..i + 4] == b"\r\n\r\n" {
            return Some(RecordEnd {
                record_len: i,
                consumed: i + 4,
            });
        }
        i += 1;
    }
    None
}

/// Parse one record's text. Returns `None` for comment-only or empty
/// records (e.g. keep-alive pings).
fn parse_record(text: &str) -> Option<SseRecord> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim_start().to_owned());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comments and other fields (id:, retry:) are ignored.
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseRecord {
        event,
        data: data_lines.join("\n"),
    })
}

/// Incremental newline-delimited line buffer (NDJSON backends).
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Fresh buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk, returning all complete lines (trailing `\r` trimmed,
    /// blank lines dropped).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if !line.trim().is_empty() {
                lines.push(line.to_owned());
            }
        }
        lines
    }

    /// Flush the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&bytes).trim().to_owned();
        (!line.is_empty()).then_some(line)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
