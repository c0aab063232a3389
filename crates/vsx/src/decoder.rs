//! 🧩 RecordDecoder: bytes in, records out, one line at a time.
//!
//! 🎬 *[a 400 MB NDJSON file approaches. the decoder does not flinch. it has a
//! memchr and a dream.]*
//!
//! The publisher's files are newline-delimited JSON. Each line is a FHIR
//! resource with a `resourceType`. We never hold more than the current partial
//! line (plus whatever the last network chunk dragged in) in memory, and one bad
//! line never spoils the rest of the file.
//!
//! ```text
//!   HTTP chunks ──▶ LineSplitter (memchr '\n') ──▶ parse_line ──▶ Result<RawRecord, DecodeError>
//! ```
//!
//! 🧠 Knowledge graph:
//! - Blank lines are skipped silently. They still bump the line counter so log
//!   line numbers match `sed -n` on the original file.
//! - Lines longer than `max_line_bytes` are discarded up to the next newline and
//!   reported as `LineTooLong`.
//! - A transport error mid-body ends the sequence with a terminal
//!   `DecodeError::Stream`.
//!
//! 🦆

use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use memchr::memchr;

use crate::common::{RawRecord, RecordKind};
use crate::errors::DecodeError;

/// 📏 One MiB. If a single appointment slot needs more than this, we have questions.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// 🧩 Turns a byte stream of NDJSON into a lazy stream of per-line results.
#[derive(Debug, Clone, Copy)]
pub struct RecordDecoder {
    max_line_bytes: usize,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl RecordDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }

    /// 🚰 Decode `bytes` lazily.
    ///
    /// Each call starts a fresh, single-pass sequence. Nothing is read from
    /// `bytes` until the returned stream is polled, and it is only read as far
    /// as needed to produce the next item.
    pub fn decode<S, B, E>(
        &self,
        bytes: S,
    ) -> impl Stream<Item = Result<RawRecord, DecodeError>> + use<S, B, E>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let state = DecodeState {
            bytes: Box::pin(bytes),
            splitter: LineSplitter::new(self.max_line_bytes),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                // 📦 Drain whatever complete lines we already hold before asking the network for more.
                if let Some(item) = state.splitter.next_item() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.splitter.push(chunk.as_ref()),
                    Some(Err(error)) => {
                        state.finished = true;
                        state.splitter.abandon();
                        let failure = DecodeError::Stream {
                            line: state.splitter.line_no,
                            reason: error.to_string(),
                        };
                        return Some((Err(failure), state));
                    }
                    None => {
                        state.finished = true;
                        // 🏁 EOF. The last line is allowed to skip its newline. Rude, but legal.
                        return state.splitter.finish().map(|item| (item, state));
                    }
                }
            }
        })
    }
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    splitter: LineSplitter,
    finished: bool,
}

/// ✂️ Incremental newline splitter over a growable buffer.
///
/// `consumed..` is the unread tail; `scanned` is how far we already looked for
/// `\n` so a long partial line is never rescanned from the start.
#[derive(Debug)]
struct LineSplitter {
    buffer: Vec<u8>,
    consumed: usize,
    scanned: usize,
    line_no: usize,
    discarding: bool,
    max_line_bytes: usize,
}

impl LineSplitter {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            scanned: 0,
            line_no: 0,
            discarding: false,
            max_line_bytes,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let chunk = if self.discarding {
            // 🗑️ Still inside an oversized line. Skip to its newline, keep the rest.
            match memchr(b'\n', chunk) {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return,
            }
        } else {
            chunk
        };

        if self.consumed > 0 {
            self.buffer.drain(..self.consumed);
            self.scanned -= self.consumed;
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    fn next_item(&mut self) -> Option<Result<RawRecord, DecodeError>> {
        loop {
            match memchr(b'\n', &self.buffer[self.scanned..]) {
                Some(offset) => {
                    let start = self.consumed;
                    let end = self.scanned + offset;
                    self.consumed = end + 1;
                    self.scanned = end + 1;
                    self.line_no += 1;
                    if let Some(item) = self.parse(start, end) {
                        return Some(item);
                    }
                }
                None => {
                    self.scanned = self.buffer.len();
                    if self.buffer.len() - self.consumed > self.max_line_bytes {
                        self.line_no += 1;
                        self.abandon();
                        self.discarding = true;
                        return Some(Err(DecodeError::LineTooLong {
                            line: self.line_no,
                            max_line_bytes: self.max_line_bytes,
                        }));
                    }
                    return None;
                }
            }
        }
    }

    fn finish(&mut self) -> Option<Result<RawRecord, DecodeError>> {
        if self.discarding || self.consumed >= self.buffer.len() {
            return None;
        }
        let (start, end) = (self.consumed, self.buffer.len());
        self.consumed = end;
        self.scanned = end;
        self.line_no += 1;
        self.parse(start, end)
    }

    fn abandon(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
        self.scanned = 0;
    }

    fn parse(&self, start: usize, end: usize) -> Option<Result<RawRecord, DecodeError>> {
        if end - start > self.max_line_bytes {
            return Some(Err(DecodeError::LineTooLong {
                line: self.line_no,
                max_line_bytes: self.max_line_bytes,
            }));
        }
        parse_line(&self.buffer[start..end], self.line_no)
    }
}

/// 🔍 Parse one line. `None` means blank, which is neither a record nor a crime.
fn parse_line(raw: &[u8], line: usize) -> Option<Result<RawRecord, DecodeError>> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }

    let body: serde_json::Value = match serde_json::from_slice(trimmed) {
        Ok(body) => body,
        Err(error) => {
            return Some(Err(DecodeError::Malformed {
                line,
                reason: error.to_string(),
            }));
        }
    };

    if !body.is_object() {
        return Some(Err(DecodeError::Malformed {
            line,
            reason: "expected a JSON object".to_string(),
        }));
    }

    let kind = match body.get("resourceType").and_then(serde_json::Value::as_str) {
        Some(kind) if !kind.is_empty() => RecordKind::from(kind),
        _ => return Some(Err(DecodeError::MissingResourceType { line })),
    };

    Some(Ok(RawRecord { kind, line, body }))
}
