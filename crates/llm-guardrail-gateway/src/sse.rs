//! Server-Sent Events framing.
//!
//! Upstream bytes are split into whole events so they can be held back and
//! later forwarded byte-for-byte. Each event keeps its raw frame alongside
//! the joined `data:` payload.

use bytes::Bytes;

/// Terminal sentinel of a chat-completion stream.
pub const DONE: &str = "[DONE]";

/// One complete event as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Exact bytes, including the blank-line terminator when present.
    pub raw: Bytes,
    /// `data:` lines joined with `\n`; `None` for comment-only events.
    pub data: Option<String>,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.as_deref() == Some(DONE)
    }

    /// Payload of a JSON data event, skipping `[DONE]`.
    pub fn json_data(&self) -> Option<&str> {
        self.data.as_deref().filter(|d| *d != DONE && !d.is_empty())
    }
}

/// Extract the payload from a `data:` line. Returns `None` for blank lines,
/// comments and other fields.
pub fn extract_sse_data(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:")?;
    Some(payload.strip_prefix(' ').unwrap_or(payload))
}

/// Incremental event splitter.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = event_boundary(&self.buf) {
            let raw: Vec<u8> = self.buf.drain(..end).collect();
            events.push(parse_event(Bytes::from(raw)));
        }
        events
    }

    /// Flush a trailing event that was never terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            self.buf.clear();
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        Some(parse_event(Bytes::from(raw)))
    }
}

/// End offset (exclusive) of the first complete event.
fn event_boundary(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len() {
        if buf[i] != b'\n' {
            continue;
        }
        match buf.get(i + 1) {
            Some(b'\n') => return Some(i + 2),
            Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some(i + 3),
            _ => {}
        }
    }
    None
}

fn parse_event(raw: Bytes) -> SseEvent {
    let text = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = text.lines().filter_map(extract_sse_data).collect();
    let data = (!lines.is_empty()).then(|| lines.join("\n"));
    SseEvent { raw, data }
}

/// Frame a JSON payload as a data event.
pub fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

pub fn done_frame() -> Bytes {
    data_frame(DONE)
}
