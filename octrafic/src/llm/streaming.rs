//! Line-buffered parser for server-sent event bodies.

use crate::error::LlmError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Turns a byte stream of SSE frames into the payloads of its `data:` lines.
///
/// The `[DONE]` marker and comment lines are swallowed. Bytes are buffered
/// until a full line arrives, so multibyte characters may straddle chunks.
#[derive(Debug)]
pub struct SseStreamParser<S> {
    inner: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S> SseStreamParser<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    /// Create a new SSE stream parser.
    pub const fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
            finished: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }
}

/// Payload of an SSE `data:` line, if the line is one.
#[must_use]
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    trimmed
        .strip_prefix("data:")
        .map(str::trim_start)
}

/// Check if the data indicates stream completion.
#[must_use]
pub fn is_done_marker(data: &str) -> bool {
    data.trim() == "[DONE]"
}

impl<S> Stream for SseStreamParser<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.next_line() {
                if let Some(data) = parse_sse_data(&line)
                    && !is_done_marker(data)
                {
                    return Poll::Ready(Some(Ok(data.to_string())));
                }
                continue;
            }

            if self.finished {
                let remaining = std::mem::take(&mut self.buffer);
                let remaining = String::from_utf8_lossy(&remaining);
                let data = parse_sse_data(&remaining)
                    .filter(|data| !is_done_marker(data))
                    .map(|data| Ok(data.to_string()));
                return Poll::Ready(data);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(LlmError::stream(e.to_string()))));
                }
                Poll::Ready(None) => self.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_sse_parse_data() {
        assert_eq!(parse_sse_data("data: hello"), Some("hello"));
        assert_eq!(parse_sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data(": keep-alive"), None);
        assert_eq!(parse_sse_data("event: message"), None);
        assert_eq!(parse_sse_data(""), None);
    }

    #[test]
    fn test_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(is_done_marker(" [DONE] "));
        assert!(!is_done_marker("{}"));
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"x\":")),
            Ok(Bytes::from_static(b"1}\n\ndata: second\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];
        let parser = SseStreamParser::new(futures::stream::iter(chunks));
        let items: Vec<String> = parser.map(|item| item.unwrap_or_default()).collect().await;
        assert_eq!(items, vec!["{\"x\":1}".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let frame = "data: café\n".as_bytes();
        let split = frame.len() - 2;
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&frame[..split])),
            Ok(Bytes::copy_from_slice(&frame[split..])),
        ];
        let parser = SseStreamParser::new(futures::stream::iter(chunks));
        let items: Vec<String> = parser.map(|item| item.unwrap_or_default()).collect().await;
        assert_eq!(items, vec!["café".to_string()]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> =
            vec![Ok(Bytes::from_static(b"data: tail"))];
        let parser = SseStreamParser::new(futures::stream::iter(chunks));
        let items: Vec<String> = parser.map(|item| item.unwrap_or_default()).collect().await;
        assert_eq!(items, vec!["tail".to_string()]);
    }
}
