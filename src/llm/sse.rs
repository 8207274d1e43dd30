//! Incremental SSE line parsing for the completion stream.
//!
//! The llama.cpp server emits newline-delimited `data: {...}` lines.
//! Bytes arrive in arbitrary chunk boundaries, so the parser buffers a
//! partial line across pushes. Comment lines (leading `:`) and empty
//! lines are skipped.

/// Accumulates bytes and yields complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseLineParser {
    line_buffer: String,
}

impl SseLineParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes; returns the `data:` payloads of every line
    /// completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(chunk);
        let mut payloads = Vec::new();

        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line_buffer);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(data) = data_payload(line) {
                    payloads.push(data.to_owned());
                }
            } else {
                self.line_buffer.push(ch);
            }
        }

        payloads
    }
}

/// Extract the payload of a `data: ` line; `None` for empty lines,
/// comments, and any other field.
fn data_payload(line: &str) -> Option<&str> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data: ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_data_line() {
        let mut parser = SseLineParser::new();
        let payloads = parser.push(b"data: {\"content\":\"hi\"}\n");
        assert_eq!(payloads, vec!["{\"content\":\"hi\"}".to_owned()]);
    }

    #[test]
    fn line_split_across_chunks() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data: {\"content\"").is_empty());
        let payloads = parser.push(b":\"hello\"}\n");
        assert_eq!(payloads, vec!["{\"content\":\"hello\"}".to_owned()]);
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut parser = SseLineParser::new();
        let payloads = parser.push(b"data: first\n\ndata: second\n");
        assert_eq!(payloads, vec!["first".to_owned(), "second".to_owned()]);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let mut parser = SseLineParser::new();
        let payloads = parser.push(b": keep-alive\n\ndata: token\n\n");
        assert_eq!(payloads, vec!["token".to_owned()]);
    }

    #[test]
    fn crlf_is_tolerated() {
        let mut parser = SseLineParser::new();
        let payloads = parser.push(b"data: token\r\n");
        assert_eq!(payloads, vec!["token".to_owned()]);
    }

    #[test]
    fn non_data_fields_ignored() {
        let mut parser = SseLineParser::new();
        let payloads = parser.push(b"event: message\nretry: 100\ndata: x\n");
        assert_eq!(payloads, vec!["x".to_owned()]);
    }

    #[test]
    fn data_without_space_is_not_a_payload() {
        // The server always emits "data: " with a space; anything else
        // is not ours to parse.
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data:nospace\n").is_empty());
    }
}
