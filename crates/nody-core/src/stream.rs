//! Decoding of streamed terminal output.
//!
//! The backend answers `POST /terminal/execute-stream` with newline-delimited
//! lines; each meaningful line is `data: <json>` where the JSON carries any of
//! `output`, `error` and `done`. Chunks from the transport do not respect line
//! boundaries, so the decoder keeps the trailing partial line until the next
//! chunk (or `finish`) completes it.

use serde::Deserialize;
use tracing::{debug, warn};

/// Prefix marking an event line.
pub const EVENT_MARKER: &str = "data:";

/// Longest partial line kept while waiting for its newline. Past this the
/// line is dropped up to its end.
pub const MAX_PENDING_LINE: usize = 1024 * 1024;

/// One decoded stream event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub done: bool,
}

/// Why a line produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// Event marker present but the payload is not valid JSON
    Malformed(String),
}

/// Parse a single complete line.
///
/// Returns `Ok(None)` for blank lines and lines without the event marker.
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, LineError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let Some(payload) = line.strip_prefix(EVENT_MARKER) else {
        debug!("Ignoring non-event line: {}", line);
        return Ok(None);
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| LineError::Malformed(e.to_string()))
}

/// Incremental line decoder for one command stream.
#[derive(Debug, Default)]
pub struct EventDecoder {
    /// Bytes after the last newline seen so far
    pending: Vec<u8>,
    /// Inside an oversized line; skip until the next newline
    discarding: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events of every line it completed.
    ///
    /// Malformed lines are logged and skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut chunk = chunk;
        if self.discarding {
            let Some(end) = chunk.iter().position(|b| *b == b'\n') else {
                return Vec::new();
            };
            self.discarding = false;
            chunk = &chunk[end + 1..];
        }
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            self.drop_oversized();
            return Vec::new();
        };

        // Keep the incomplete tail (which may end mid UTF-8 sequence) for later.
        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);
        self.drop_oversized();

        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        self.discarding = false;
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    fn drop_oversized(&mut self) {
        if self.pending.len() > MAX_PENDING_LINE {
            warn!(
                "Dropping stream line over {} bytes without a newline",
                MAX_PENDING_LINE
            );
            self.pending = Vec::new();
            self.discarding = true;
        }
    }

    /// Bytes buffered waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> Option<StreamEvent> {
    let line = String::from_utf8_lossy(bytes);
    match parse_line(&line) {
        Ok(event) => event,
        Err(LineError::Malformed(reason)) => {
            warn!("Skipping malformed stream event ({}): {}", reason, line);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(text: &str) -> StreamEvent {
        StreamEvent {
            output: Some(text.into()),
            ..StreamEvent::default()
        }
    }

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line(": keep-alive"), Ok(None));
        assert_eq!(parse_line("data: {\"output\":\"hi\"}"), Ok(Some(output("hi"))));
        assert_eq!(parse_line("data:{\"output\":\"hi\"}\r"), Ok(Some(output("hi"))));
        assert_eq!(
            parse_line("data: {\"done\":true}"),
            Ok(Some(StreamEvent {
                done: true,
                ..StreamEvent::default()
            }))
        );
        assert!(matches!(
            parse_line("data: not json"),
            Err(LineError::Malformed(_))
        ));
    }

    #[test]
    fn test_decoder_splits_lines_in_one_chunk() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(
            b"data: {\"output\":\"a\"}\n\ndata: {\"error\":\"e\"}\ndata: {\"done\":true}\n",
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].error.as_deref(), Some("e"));
        assert!(events[2].done);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_joins_line_split_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {\"outp").is_empty());
        assert!(decoder.push(b"ut\":\"joined\"").is_empty());
        assert_eq!(decoder.push(b"}\ndata: {\"out"), vec![output("joined")]);
        assert_eq!(decoder.push(b"put\":\"next\"}\n"), vec![output("next")]);
    }

    #[test]
    fn test_decoder_handles_utf8_split_across_chunks() {
        let line = "data: {\"output\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = EventDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(decoder.push(&line[split..]), vec![output("héllo")]);
    }

    #[test]
    fn test_decoder_skips_malformed_lines() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(
            b"data: {\"output\":\"a\"}\ndata: {broken\ndata: {\"output\":\"b\"}\n",
        );
        assert_eq!(events, vec![output("a"), output("b")]);
    }

    #[test]
    fn test_oversized_line_is_dropped_through_its_newline() {
        let mut decoder = EventDecoder::new();
        let mut huge = b"data: {\"output\":\"".to_vec();
        huge.resize(MAX_PENDING_LINE + 1, b'x');

        assert!(decoder.push(&huge).is_empty());
        assert_eq!(decoder.pending_len(), 0);
        assert!(decoder.push(b"still the same line").is_empty());
        assert_eq!(decoder.pending_len(), 0);

        assert_eq!(
            decoder.push(b"xx\"}\ndata: {\"output\":\"after\"}\n"),
            vec![output("after")]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {\"done\":true}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(StreamEvent {
                done: true,
                ..StreamEvent::default()
            })
        );
        assert_eq!(decoder.finish(), None);
    }
}
