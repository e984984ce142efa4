//! Incremental frame decoder
//!
//! Bytes arrive in arbitrary chunks. UTF-8 decoding state carries over
//! between chunks so a multi-byte character split across a boundary still
//! decodes; text is split on newlines and every line starting with the
//! frame prefix is parsed as a JSON [`StreamEvent`]. Lines that fail to
//! parse are skipped, never fatal.

use tracing::trace;

use super::frame::StreamEvent;

/// Stateful line/frame splitter for one stream
#[derive(Debug)]
pub struct FrameDecoder {
    prefix: String,
    /// Undecoded tail of an incomplete UTF-8 sequence
    pending_bytes: Vec<u8>,
    /// Text received after the last newline
    partial_line: String,
    skipped: u64,
}

impl FrameDecoder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            pending_bytes: Vec::new(),
            partial_line: String::new(),
            skipped: 0,
        }
    }

    /// Feed a chunk; returns every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let text = self.decode_utf8(chunk);
        self.partial_line.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=pos).collect();
            if let Some(event) = self.parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// End of stream: flush whatever is buffered as a final line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.partial_line.push_str(&tail);
        }
        let line = std::mem::take(&mut self.partial_line);
        self.parse_line(&line).into_iter().collect()
    }

    /// Prefixed lines that were dropped as undecodable
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending_bytes.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(
                        &self.pending_bytes[..valid_up_to],
                    ));
                    match err.error_len() {
                        // Invalid sequence in the middle: replace and go on.
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid_up_to + len);
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending_bytes.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn parse_line(&mut self, raw: &str) -> Option<StreamEvent> {
        let line = raw.trim_end_matches(['\n', '\r']);
        let payload = line
            .strip_prefix(self.prefix.as_str())
            .or_else(|| line.strip_prefix(self.prefix.trim_end()))?
            .trim_start();

        if payload.is_empty() {
            return None;
        }

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                self.skipped += 1;
                trace!("Skipping undecodable frame ({}): {}", e, payload);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new("data: ")
    }

    #[test]
    fn test_single_chunk_multiple_frames() {
        let mut d = decoder();
        let events = d.push(
            b"data: {\"type\":\"log\",\"message\":\"a\"}\ndata: {\"type\":\"heartbeat\"}\n",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Log {
                    message: "a".to_string()
                },
                StreamEvent::Heartbeat
            ]
        );
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut d = decoder();
        assert!(d.push(b"data: {\"type\":\"lo").is_empty());
        assert!(d.push(b"g\",\"message\":\"split\"").is_empty());
        let events = d.push(b"}\n");
        assert_eq!(
            events,
            vec![StreamEvent::Log {
                message: "split".to_string()
            }]
        );
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let line = "data: {\"type\":\"log\",\"message\":\"➜  Local: ok\"}\n".as_bytes();
        let arrow_start = line.iter().position(|b| *b == 0xE2).unwrap();

        let mut d = decoder();
        assert!(d.push(&line[..arrow_start + 1]).is_empty());
        assert!(d.push(&line[arrow_start + 1..arrow_start + 2]).is_empty());
        let events = d.push(&line[arrow_start + 2..]);
        assert_eq!(
            events,
            vec![StreamEvent::Log {
                message: "➜  Local: ok".to_string()
            }]
        );
    }

    #[test]
    fn test_crlf_lines() {
        let mut d = decoder();
        let events = d.push(b"data: {\"type\":\"heartbeat\"}\r\n");
        assert_eq!(events, vec![StreamEvent::Heartbeat]);
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let mut d = decoder();
        let events = d.push(b"data: {not json\ndata: {also bad\ndata: {\"type\":\"heartbeat\"}\n");
        assert_eq!(events, vec![StreamEvent::Heartbeat]);
        assert_eq!(d.skipped_frames(), 2);
    }

    #[test]
    fn test_unprefixed_and_blank_lines_ignored() {
        let mut d = decoder();
        let events = d.push(b": keep-alive comment\n\nevent: message\ndata: \n");
        assert!(events.is_empty());
        assert_eq!(d.skipped_frames(), 0);
    }

    #[test]
    fn test_prefix_without_space() {
        let mut d = decoder();
        let events = d.push(b"data:{\"type\":\"heartbeat\"}\n");
        assert_eq!(events, vec![StreamEvent::Heartbeat]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut d = decoder();
        assert!(d
            .push(b"data: {\"type\":\"error\",\"message\":\"tail\"}")
            .is_empty());
        let events = d.finish();
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                message: "tail".to_string()
            }]
        );
        assert!(d.finish().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut d = decoder();
        let mut bytes = b"data: {\"type\":\"log\",\"message\":\"a".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b"b\"}\n");
        let events = d.push(&bytes);
        assert_eq!(
            events,
            vec![StreamEvent::Log {
                message: "a\u{FFFD}b".to_string()
            }]
        );
    }
}
