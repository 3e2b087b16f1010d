//! Server-Sent Events parsing for streamed inference responses
//!
//! The KServe `generate_stream` endpoint answers with one SSE event per
//! partial response. The HTTP backend only needs to count events and their
//! sizes, so the parser keeps the event data and type and drops the rest.

/// Maximum buffer size (1MB) to prevent unbounded memory growth from malformed streams.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Incremental SSE parser
///
/// Buffers incoming bytes and extracts complete events, which are separated
/// by a blank line:
///
/// ```text
/// data: {"model_name": "m", "outputs": [...]}
///
/// event: error
/// data: {"error": "model unavailable"}
///
/// ```
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    truncated: bool,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        if self.buffer.len() > MAX_BUFFER_SIZE {
            if !self.truncated {
                tracing::warn!(
                    limit = MAX_BUFFER_SIZE,
                    "SSE buffer overflow, truncating malformed stream"
                );
                self.truncated = true;
            }
            // Truncate at a newline boundary to avoid splitting events
            let mut target_start = self.buffer.len() - MAX_BUFFER_SIZE / 2;
            while !self.buffer.is_char_boundary(target_start) {
                target_start += 1;
            }
            let start = self.buffer.as_bytes()[target_start..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|pos| target_start + pos + 1)
                .unwrap_or(target_start);
            self.buffer.drain(..start);
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_event(&raw) {
                events.push(event);
            }
            self.truncated = false;
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        let raw = std::mem::take(&mut self.buffer);
        parse_event(&raw)
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut data_lines = Vec::new();
    let mut event_type = None;

    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    if data.trim() == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data { data, event_type })
}

/// A single Server-Sent Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Data event
    Data {
        /// Event payload
        data: String,
        /// Optional event type
        event_type: Option<String>,
    },
    /// End of stream marker (`[DONE]`)
    Done,
}

impl SseEvent {
    /// Whether the server reported an error through this event
    pub fn is_error(&self) -> bool {
        match self {
            SseEvent::Data { event_type, data } => {
                event_type.as_deref() == Some("error")
                    || serde_json::from_str::<serde_json::Value>(data)
                        .map_or(false, |value| value.get("error").is_some())
            }
            SseEvent::Done => false,
        }
    }

    /// Payload of a data event
    pub fn data(&self) -> Option<&str> {
        match self {
            SseEvent::Data { data, .. } => Some(data),
            SseEvent::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"outputs\"").is_empty());

        let events = parser.feed(b": []}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data(), Some("{\"outputs\": []}"));
        assert_eq!(events[1], SseEvent::Done);
    }

    #[test]
    fn test_error_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: error\ndata:{\"error\":\"unavailable\"}\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_error());
        assert_eq!(events[0].data(), Some("{\"error\":\"unavailable\"}"));
    }

    #[test]
    fn test_error_field_inside_output_is_not_an_error() {
        let mut parser = SseParser::new();
        let events = parser.feed(
            b"data: {\"outputs\": [{\"name\": \"error\", \"data\": [\"\\\"error\\\"\"]}]}\n\ndata: {\"error\": \"oom\"}\n\n",
        );
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_error());
        assert!(events[1].is_error());
    }

    #[test]
    fn test_overflow_with_multibyte_data() {
        let mut parser = SseParser::new();
        let long = format!("data: {}", "\u{20ac}".repeat(349_526));
        assert!(parser.feed(long.as_bytes()).is_empty());
        assert!(parser.buffer.len() <= MAX_BUFFER_SIZE / 2 + 3);

        // Invalid UTF-8 turns into multi-byte replacement characters
        let mut parser = SseParser::new();
        assert!(parser.feed(&vec![0xff; MAX_BUFFER_SIZE / 2 + 7]).is_empty());
        assert!(parser.feed(b"\n\ndata: ok\n\n").iter().any(|e| e.data() == Some("ok")));
    }

    #[test]
    fn test_finish_flushes_tail() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": keepalive\n\ndata: tail").is_empty());
        assert_eq!(
            parser.finish(),
            Some(SseEvent::Data {
                data: "tail".into(),
                event_type: None
            })
        );
        assert_eq!(parser.finish(), None);
    }
}
