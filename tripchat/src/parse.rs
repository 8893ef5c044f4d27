//! Response parsing for both call modes: the buffered JSON envelope and the
//! `text/event-stream` body of a streaming completion.

use crate::classify::logged;
use crate::error::ChatError;
use crate::sanitize::body_excerpt;
use crate::types::{ChatResponse, StreamChunk, Usage};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

// ---- Non-streaming envelope ----

#[derive(Deserialize)]
struct CompletionBody {
    choices: Option<Vec<CompletionChoice>>,
    usage: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first choice's message text out of a chat-completion body.
pub fn parse_completion(body: &str) -> Result<ChatResponse, ChatError> {
    let malformed = || ChatError::MalformedResponse {
        body: body_excerpt(body),
    };

    let parsed: CompletionBody = serde_json::from_str(body).map_err(|_| malformed())?;
    let choice = parsed
        .choices
        .and_then(|choices| choices.into_iter().next())
        .ok_or_else(malformed)?;
    let message = choice.message.ok_or_else(malformed)?;

    Ok(ChatResponse::new(
        message.content.unwrap_or_default(),
        parsed.usage.and_then(usage_from_value),
    ))
}

/// Token counts are informational; an odd `usage` object is dropped, not fatal.
fn usage_from_value(value: serde_json::Value) -> Option<Usage> {
    match serde_json::from_value(value) {
        Ok(usage) => Some(usage),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unreadable usage block");
            None
        }
    }
}

// ---- Streaming events ----

#[derive(Deserialize)]
struct StreamBody {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// What one line of an event stream means to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Blank, comment, keep-alive, unparseable or content-free line.
    Skip,
    /// The `[DONE]` sentinel.
    Done,
    /// A non-empty text fragment.
    Delta(String),
}

pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return SseLine::Skip;
    };
    if data.trim_end() == DONE_MARKER {
        return SseLine::Done;
    }

    let event: StreamBody = match serde_json::from_str(data) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::debug!(error = %e, line = %body_excerpt(data), "skipping unparseable stream line");
            return SseLine::Skip;
        }
    };

    event
        .choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty())
        .map_or(SseLine::Skip, SseLine::Delta)
}

/// Splits a byte stream into text lines.
///
/// Works on raw bytes so that a line, or a multi-byte character, split
/// across two transport chunks comes out whole.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and take every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Take the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Turn a streaming response body into text chunks.
///
/// Ends after `[DONE]` or when the body closes. Waiting longer than
/// `idle_timeout` for the next body chunk yields a Timeout error.
pub fn sse_chunks<S>(
    body: S,
    idle_timeout: Duration,
    url: String,
) -> BoxStream<'static, Result<StreamChunk, ChatError>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let s = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = LineDecoder::new();
        let mut delivered = 0usize;

        loop {
            let next = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(logged(ChatError::Timeout { url: url.clone() }, &url));
                    return;
                }
            };

            let (lines, ended) = match next {
                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                Some(Err(e)) if e.is_timeout() => {
                    yield Err(logged(ChatError::Timeout { url: url.clone() }, &url));
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, "stream body interrupted, ending stream");
                    (decoder.finish().into_iter().collect(), true)
                }
                None => (decoder.finish().into_iter().collect(), true),
            };

            for line in lines {
                match parse_sse_line(&line) {
                    SseLine::Skip => continue,
                    SseLine::Done => {
                        tracing::info!(url = %url, chunks = delivered, "chat stream completed");
                        return;
                    }
                    SseLine::Delta(text) => {
                        delivered += 1;
                        yield Ok(StreamChunk::new(text));
                    }
                }
            }

            if ended {
                tracing::info!(url = %url, chunks = delivered, "chat stream closed without [DONE]");
                return;
            }
        }
    };
    Box::pin(s)
}
