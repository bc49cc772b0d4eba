use async_stream::try_stream;
use futures::{Stream, StreamExt};

use super::decode::Utf8Decoder;
use crate::error::Result;

const DONE: &str = "[DONE]";

/// Incremental parser for `text/event-stream` bodies.
///
/// Frames are blank-line delimited; only `data:` fields are kept, multiple
/// data lines in one frame are joined with `\n`. Carriage returns are
/// dropped so CRLF-framed streams parse the same as LF-framed ones.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Decoder,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and drain the data payloads of every completed frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(bytes);
        self.push_text(&text);
        self.drain_frames()
    }

    /// Drain frames left in the buffer once the body has ended, including a
    /// final frame missing its trailing blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let tail = self.utf8.finish();
        self.push_text(&tail);
        let mut payloads = self.drain_frames();
        let rest = std::mem::take(&mut self.buffer);
        if let Some(data) = frame_data(&rest) {
            payloads.push(data);
        }
        payloads
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && !self.utf8.has_pending()
    }

    fn push_text(&mut self, text: &str) {
        self.buffer.extend(text.chars().filter(|c| *c != '\r'));
    }

    fn drain_frames(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(split) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..split + 2).collect();
            if let Some(data) = frame_data(&frame) {
                payloads.push(data);
            }
        }
        payloads
    }
}

fn frame_data(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    let data = data_lines.join("\n");
    if data.trim().is_empty() {
        None
    } else {
        Some(data)
    }
}

/// Stream the data payloads of an event-stream response, stopping at the
/// `[DONE]` sentinel or the end of the body.
pub(crate) fn data_payloads(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    try_stream! {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        let mut done = false;

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for data in decoder.feed(&chunk) {
                if data.trim() == DONE {
                    done = true;
                    break 'read;
                }
                yield data;
            }
        }

        if !done {
            for data in decoder.finish() {
                if data.trim() == DONE {
                    break;
                }
                yield data;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frames_incrementally() {
        let mut decoder = SseDecoder::new();

        let first = decoder.feed(b"data: {\"a\":1}\n\ndata: {\"a\"");
        assert_eq!(first, vec!["{\"a\":1}".to_string()]);
        assert!(!decoder.is_empty_buffer());

        let second = decoder.feed(b":2}\n\n");
        assert_eq!(second, vec!["{\"a\":2}".to_string()]);
        assert!(decoder.is_empty_buffer());
    }

    #[test]
    fn crlf_framing_and_event_lines() {
        let mut decoder = SseDecoder::new();
        let payloads =
            decoder.feed(b"event: message_start\r\ndata: {\"x\":true}\r\n\r\n: keep-alive\r\n\r\n");
        assert_eq!(payloads, vec!["{\"x\":true}".to_string()]);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(b"data: first\ndata: second\n\n");
        assert_eq!(payloads, vec!["first\nsecond".to_string()]);
    }

    #[test]
    fn unterminated_final_frame_is_flushed_on_finish() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail".to_string()]);
    }

    #[test]
    fn multibyte_text_split_inside_a_frame() {
        let frame = "data: {\"t\":\"こんにちは\"}\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut payloads = decoder.feed(&frame[..13]);
        payloads.extend(decoder.feed(&frame[13..]));
        assert_eq!(payloads, vec!["{\"t\":\"こんにちは\"}".to_string()]);
    }
}
