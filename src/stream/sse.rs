use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use serde_json::Value;

use crate::error::BridgeError;

const DONE_MARKER: &str = "[DONE]";

/// Whether the parser can accept more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Open,
    Done,
}

/// Incremental SSE line parser.
///
/// Feed it raw body bytes in arbitrary chunks; complete lines are decoded and
/// the incomplete tail is kept for the next call. Because lines are split on
/// `\n` before UTF-8 decoding, a multi-byte character split across chunks is
/// reassembled naturally.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    read_offset: usize,
    done: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return any JSON payloads parsed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append parsed payloads into a caller-provided buffer.
    pub fn feed_into<E: Extend<Value>>(&mut self, chunk: &[u8], out: &mut E) -> FeedStatus {
        if self.done {
            return FeedStatus::Done;
        }
        self.buffer.extend_from_slice(chunk);

        let scan_start = self.read_offset;
        let mut processed_up_to = scan_start;
        let mut status = FeedStatus::Open;
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            status = process_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
            if status == FeedStatus::Done {
                break;
            }
        }
        if status == FeedStatus::Done {
            self.mark_done();
            return FeedStatus::Done;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
        FeedStatus::Open
    }

    /// Treat any unterminated trailing line as complete; called at end of body.
    pub fn finish_into<E: Extend<Value>>(&mut self, out: &mut E) {
        if self.done {
            return;
        }
        if self.read_offset < self.buffer.len() {
            let tail = std::mem::take(&mut self.buffer);
            let _ = process_line(&tail[self.read_offset..], out);
        }
        self.mark_done();
    }

    fn mark_done(&mut self) {
        self.done = true;
        self.buffer = Vec::new();
        self.read_offset = 0;
    }
}

fn process_line<E: Extend<Value>>(raw: &[u8], out: &mut E) -> FeedStatus {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let Some(payload) = raw.strip_prefix(b"data:") else {
        // event:, id:, comments and blank lines carry nothing we use
        return FeedStatus::Open;
    };
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);
    let payload = String::from_utf8_lossy(payload);
    let payload = payload.trim();
    if payload.is_empty() {
        return FeedStatus::Open;
    }
    if payload == DONE_MARKER {
        return FeedStatus::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => out.extend(std::iter::once(value)),
        Err(e) => tracing::trace!(error = %e, "skipping malformed SSE data line"),
    }
    FeedStatus::Open
}

/// Turn an HTTP body byte stream into a stream of SSE JSON payloads.
///
/// The body is only read while the returned stream is polled. A transport
/// error is yielded once and ends the stream.
pub fn sse_json_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Value, BridgeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            VecDeque::<Value>::with_capacity(8),
        ),
        |(mut stream, mut parser, mut pending)| async move {
            loop {
                if let Some(value) = pending.pop_front() {
                    return Some((Ok(value), (stream, parser, pending)));
                }
                if parser.is_done() {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        parser.feed_into(&bytes, &mut pending);
                    }
                    Some(Err(e)) => {
                        parser.mark_done();
                        return Some((Err(e.into()), (stream, parser, pending)));
                    }
                    None => parser.finish_into(&mut pending),
                }
            }
        },
    )
}
