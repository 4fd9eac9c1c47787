//! Server-Sent Events (SSE) processing for streaming completions.
//!
//! This module converts the raw byte stream of a streaming chat completion into parsed
//! chunks, ending at the `data: [DONE]` sentinel.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::STREAM_ERRORS;
use crate::{ChatCompletionChunk, Error, Result};

/// One parsed event from a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(ChatCompletionChunk),
    Done,
}

/// Process a stream of bytes into a stream of completion events.
///
/// Bytes are buffered until a full event is available, so multi-byte characters split across
/// network reads decode correctly.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (stream, buffer, false),
        move |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some((event, remaining)) = extract_event(&buffer) {
                    buffer = remaining;
                    match event {
                        Some(event) => {
                            let done = matches!(event, Ok(StreamEvent::Done));
                            return Some((event, (stream, buffer, done)));
                        }
                        None => continue,
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, buffer, true)));
                    }
                    None => {
                        // A final event may lack its blank-line terminator.
                        if !buffer.iter().all(u8::is_ascii_whitespace) {
                            buffer.extend_from_slice(b"\n\n");
                            if let Some((Some(event), _)) = extract_event(&buffer) {
                                return Some((event, (stream, Vec::new(), true)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Extract a complete SSE event from the front of `buffer`.
///
/// Returns `None` when no complete event is buffered.  The inner `None` marks an event with no
/// data lines (comments and keep-alives), which callers skip.
fn extract_event(buffer: &[u8]) -> Option<(Option<Result<StreamEvent>>, Vec<u8>)> {
    let (end, delimiter) = find_delimiter(buffer)?;
    let rest = buffer[end + delimiter..].to_vec();
    let event_text = match std::str::from_utf8(&buffer[..end]) {
        Ok(text) => text,
        Err(e) => {
            return Some((
                Some(Err(Error::encoding(
                    format!("Invalid UTF-8 in stream: {e}"),
                    Some(Box::new(e)),
                ))),
                rest,
            ));
        }
    };

    let mut data = Vec::new();
    for line in event_text.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if data.is_empty() {
        return Some((None, rest));
    }
    let data = data.join("\n");
    if data.trim() == "[DONE]" {
        return Some((Some(Ok(StreamEvent::Done)), rest));
    }
    let event = serde_json::from_str::<ChatCompletionChunk>(&data)
        .map(StreamEvent::Chunk)
        .map_err(|e| {
            Error::serialization(
                format!("Malformed SSE event data: {data}"),
                Some(Box::new(e)),
            )
        });
    Some((Some(event), rest))
}

/// Finds the first blank line, accepting `\n\n` and `\r\n\r\n`.
fn find_delimiter(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
