//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```
//!
//! Decoding is incremental: bytes are appended to a [`FrameDecoder`] as
//! they arrive and complete messages come out in arrival order. A header
//! without a usable `Content-Length` or a body that is not JSON is logged
//! and skipped; the stream keeps going.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::common::Result;

const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// Sanity limit - 100MB should be plenty for any DAP message
const MAX_CONTENT_LENGTH: usize = 100 * 1024 * 1024;

/// Encode a message into a framed byte sequence
///
/// The declared length is the UTF-8 byte length of the body.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one framed message and flush
pub async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<()> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode every complete frame at the start of `buffer`
///
/// Returns the parsed messages and the number of bytes they (and any
/// discarded malformed units) occupied. Bytes past that point belong to an
/// incomplete frame and must be kept for the next call.
pub fn decode_frames(buffer: &[u8]) -> (Vec<Value>, usize) {
    let mut messages = Vec::new();
    let mut pos = 0;

    while let Some(offset) = find_delimiter(&buffer[pos..]) {
        let header = &buffer[pos..pos + offset];
        let body_start = pos + offset + HEADER_DELIMITER.len();

        let Some(len) = parse_content_length(header) else {
            tracing::warn!(
                header = %String::from_utf8_lossy(header),
                "Discarding DAP header without valid Content-Length"
            );
            pos = body_start;
            continue;
        };

        let body_end = body_start + len;
        if buffer.len() < body_end {
            break;
        }

        match serde_json::from_slice::<Value>(&buffer[body_start..body_end]) {
            Ok(message) => messages.push(message),
            Err(e) => {
                tracing::warn!(error = %e, len, "Dropping DAP message with invalid JSON body");
            }
        }
        pos = body_end;
    }

    (messages, pos)
}

fn find_delimiter(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_DELIMITER.len())
        .position(|window| window == HEADER_DELIMITER)
}

/// Find `Content-Length` among the header lines (case-insensitive name)
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("content-length") {
            return None;
        }
        value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|len| *len <= MAX_CONTENT_LENGTH)
    })
}

/// Incremental decoder holding partial input between reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every message they complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(bytes);
        let (messages, consumed) = decode_frames(&self.buffer);
        self.buffer.drain(..consumed);
        messages
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_uses_byte_length() {
        let message = json!({ "output": "héllo ✓" });
        let frame = encode(&message).unwrap();
        let text = String::from_utf8(frame.clone()).unwrap();

        let body = serde_json::to_string(&message).unwrap();
        assert!(body.len() > body.chars().count());
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let (decoded, consumed) = decode_frames(&frame);
        assert_eq!(decoded, vec![message]);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_extra_headers_and_case() {
        let data = b"content-length: 13\r\nContent-Type: application/json\r\n\r\n{\"test\":true}";
        let (decoded, consumed) = decode_frames(data);
        assert_eq!(decoded, vec![json!({ "test": true })]);
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let messages = vec![
            json!({ "seq": 1, "type": "request", "command": "initialize" }),
            json!({ "seq": 2, "type": "event", "event": "output", "body": { "output": "ünïcödé\n" } }),
            json!({ "seq": 3, "type": "response", "request_seq": 1, "success": true, "command": "initialize" }),
        ];
        let mut stream = Vec::new();
        for message in &messages {
            stream.extend(encode(message).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in &stream {
            decoded.extend(decoder.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(decoded, messages);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_irregular_chunks() {
        let messages: Vec<_> = (1..=4).map(|seq| json!({ "seq": seq, "type": "event", "event": "thread" })).collect();
        let mut stream = Vec::new();
        for message in &messages {
            stream.extend(encode(message).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(7) {
            decoded.extend(decoder.feed(chunk));
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_incomplete_body_waits() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"Content-Length: 13\r\n\r\n{\"test\"").is_empty());
        assert!(decoder.buffered() > 0);
        assert_eq!(decoder.feed(b":true}"), vec![json!({ "test": true })]);
    }

    #[test]
    fn test_malformed_header_is_skipped() {
        let mut data = b"Content-Length: banana\r\n\r\n".to_vec();
        data.extend(encode(&json!({ "seq": 1 })).unwrap());

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&data), vec![json!({ "seq": 1 })]);
    }

    #[test]
    fn test_invalid_json_is_dropped() {
        let mut data = b"Content-Length: 5\r\n\r\n{nope".to_vec();
        data.extend(encode(&json!({ "seq": 2 })).unwrap());

        let (decoded, consumed) = decode_frames(&data);
        assert_eq!(decoded, vec![json!({ "seq": 2 })]);
        assert_eq!(consumed, data.len());
    }

    #[tokio::test]
    async fn test_write_message() {
        let mut output = Vec::new();
        write_message(&mut output, &json!({ "test": true })).await.unwrap();

        let expected = "Content-Length: 13\r\n\r\n{\"test\":true}";
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }
}
