//! Incremental decoder for newline-delimited JSON streams.
//!
//! Used by the SSE service wrapper to lift complete messages out of a byte
//! stream that arrives in arbitrary chunks.

use serde::de::DeserializeOwned;

use crate::{CodecError, CodecResult};

/// Buffering decoder for newline-delimited JSON.
#[derive(Debug, Default)]
pub struct StreamingJsonDecoder {
    buffer: Vec<u8>,
}

impl StreamingJsonDecoder {
    /// Create a new streaming decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete line.
    ///
    /// Returns `Ok(None)` when more data is needed or the next line is
    /// blank. An `data: ` SSE prefix on the line is stripped before parsing.
    pub fn try_decode<T: DeserializeOwned>(&mut self) -> CodecResult<Option<T>> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let line: Vec<u8> = self.buffer.drain(..=pos).take(pos).collect();
        let line = trim_ascii(&line);

        if line.is_empty() {
            return Ok(None);
        }

        let payload = line.strip_prefix(b"data: ").unwrap_or(line);
        match serde_json::from_slice(payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(CodecError::decode(e.to_string())),
        }
    }

    /// Drop buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Whether the buffer holds no pending bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Line {
        id: u32,
    }

    #[test]
    fn decodes_complete_lines_only() {
        let mut decoder = StreamingJsonDecoder::new();
        decoder.feed(br#"{"id":1}"#);
        assert!(decoder.try_decode::<Line>().unwrap().is_none());
        decoder.feed(b"\n");
        assert_eq!(decoder.try_decode::<Line>().unwrap(), Some(Line { id: 1 }));
        assert!(decoder.is_empty());
    }

    #[test]
    fn decodes_multiple_buffered_lines() {
        let mut decoder = StreamingJsonDecoder::new();
        decoder.feed(b"{\"id\":1}\n{\"id\":2}\n");
        assert_eq!(decoder.try_decode::<Line>().unwrap(), Some(Line { id: 1 }));
        assert_eq!(decoder.try_decode::<Line>().unwrap(), Some(Line { id: 2 }));
        assert!(decoder.try_decode::<Line>().unwrap().is_none());
    }

    #[test]
    fn strips_sse_data_prefix() {
        let mut decoder = StreamingJsonDecoder::new();
        decoder.feed(b"data: {\"id\":7}\n");
        assert_eq!(decoder.try_decode::<Line>().unwrap(), Some(Line { id: 7 }));
    }

    #[test]
    fn blank_lines_are_skipped_without_error() {
        let mut decoder = StreamingJsonDecoder::new();
        decoder.feed(b"\n  \n{\"id\":3}\n");
        assert!(decoder.try_decode::<Line>().unwrap().is_none());
        assert!(decoder.try_decode::<Line>().unwrap().is_none());
        assert_eq!(decoder.try_decode::<Line>().unwrap(), Some(Line { id: 3 }));
    }

    #[test]
    fn malformed_line_reports_error_and_recovers() {
        let mut decoder = StreamingJsonDecoder::new();
        decoder.feed(b"not json\n{\"id\":4}\n");
        assert!(decoder.try_decode::<Line>().is_err());
        assert_eq!(decoder.try_decode::<Line>().unwrap(), Some(Line { id: 4 }));
    }
}
