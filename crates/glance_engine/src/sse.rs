//! Incremental parsing of OpenAI-style `text/event-stream` completions.

use glance_logging::glance_warn;
use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    Data(String),
    Done,
}

/// Longest single line kept; anything longer is dropped up to its newline.
pub const MAX_SSE_LINE: usize = 1024 * 1024;

/// Splits a byte stream into complete lines, holding back a partial trailing line
/// until the rest of it arrives.
#[derive(Debug)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    /// Set while skipping the remainder of an over-long line.
    overflowed: bool,
    max_line: usize,
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_SSE_LINE)
    }
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            overflowed: false,
            max_line,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseRecord> {
        self.pending.extend_from_slice(bytes);
        let mut records = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let newline = from + offset;
            if self.overflowed {
                self.overflowed = false;
            } else if let Some(record) = parse_line(&self.pending[start..newline]) {
                records.push(record);
            }
            start = newline + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > self.max_line {
            glance_warn!(
                "dropping event-stream line longer than {} bytes",
                self.max_line
            );
            self.pending.clear();
            self.scanned = 0;
            self.overflowed = true;
        }
        records
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<SseRecord> {
        let rest = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if std::mem::take(&mut self.overflowed) {
            return None;
        }
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<SseRecord> {
    let text = String::from_utf8_lossy(line);
    let text = text.strip_suffix('\r').unwrap_or(text.as_ref());
    let payload = text.strip_prefix(DATA_PREFIX)?;
    if payload.trim() == DONE_SENTINEL {
        Some(SseRecord::Done)
    } else {
        Some(SseRecord::Data(payload.to_string()))
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Text delta carried by one `data:` record, from `choices[0].delta.content`.
pub fn content_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}
