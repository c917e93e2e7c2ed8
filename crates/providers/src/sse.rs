//! Incremental decoder for the streamed completion response.
//!
//! The endpoint sends newline-delimited frames. Meaningful frames start
//! with `data: ` and carry either a JSON delta record or the literal
//! `[DONE]` sentinel. Everything else (blank keep-alives, comments) is
//! skipped.

use serde::Deserialize;
use shared::chat::{StreamChunk, TokenUsage};
use tracing::debug;

/// One decoded delta record.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental frame parser that buffers the trailing partial line
/// across chunk boundaries.
pub struct SseParser {
    buffer: String,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            done: false,
        }
    }

    /// Feed raw bytes from the HTTP response. Returns the chunks decoded
    /// from every complete line in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamChunk> {
        if self.done {
            // Nothing meaningful follows the sentinel.
            return Vec::new();
        }
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 1..].to_string();
            self.parse_line(line.trim(), &mut out);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush a trailing partial line left when the transport closed
    /// without sending the sentinel. Call exactly once, after the last
    /// `feed`.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let rest = std::mem::take(&mut self.buffer);
        let mut out = Vec::new();
        if !self.done {
            self.parse_line(rest.trim(), &mut out);
        }
        out
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn parse_line(&mut self, line: &str, out: &mut Vec<StreamChunk>) {
        if line.is_empty() {
            return;
        }
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        if payload == "[DONE]" {
            self.done = true;
            out.push(StreamChunk::Done);
            return;
        }
        match serde_json::from_str::<StreamFrame>(payload) {
            Ok(frame) => {
                // A frame may carry a text fragment, a usage snapshot, or
                // both; they are emitted as separate chunks.
                let token = frame
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .unwrap_or_default();
                if !token.is_empty() {
                    out.push(StreamChunk::Text(token));
                }
                if let Some(usage) = frame.usage {
                    out.push(StreamChunk::Usage(usage));
                }
            }
            Err(e) => {
                // A single bad frame is skipped, not fatal.
                debug!("skipping unparseable stream frame: {}", e);
            }
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_text(chunks: &[StreamChunk]) -> String {
        chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_basic_stream() {
        let mut parser = SseParser::new();
        let mut chunks = parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n",
        );
        chunks.extend(parser.finish());
        assert_eq!(collect_text(&chunks), "Hello");
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"one \"}}]}\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"two \"}}]}\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"three\"}}]}\n\
                     data: [DONE]\n";
        let bytes = input.as_bytes();

        // Whole input at once.
        let mut whole = SseParser::new();
        let mut whole_chunks = whole.feed(bytes);
        whole_chunks.extend(whole.finish());

        // Byte-at-a-time, and a few arbitrary split widths.
        for step in [1usize, 3, 7, 20] {
            let mut parser = SseParser::new();
            let mut chunks = Vec::new();
            for piece in bytes.chunks(step) {
                chunks.extend(parser.feed(piece));
            }
            chunks.extend(parser.finish());
            assert_eq!(
                collect_text(&chunks),
                collect_text(&whole_chunks),
                "split at {} changed output",
                step
            );
        }
    }

    #[test]
    fn test_done_is_not_a_token() {
        let mut parser = SseParser::new();
        let chunks = parser.feed(b"data: [DONE]\n");
        assert_eq!(chunks, vec![StreamChunk::Done]);
        assert!(parser.is_done());
    }

    #[test]
    fn test_lines_after_sentinel_are_discarded() {
        let mut parser = SseParser::new();
        let chunks =
            parser.feed(b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n");
        assert_eq!(chunks, vec![StreamChunk::Done]);
        assert!(parser.feed(b"data: {\"choices\":[]}\n").is_empty());
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut parser = SseParser::new();
        let mut chunks = parser.feed(
            b"data: {not-json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\ndata: [DONE]\n",
        );
        chunks.extend(parser.finish());
        assert_eq!(collect_text(&chunks), "ok");
    }

    #[test]
    fn test_empty_fragment_not_emitted() {
        let mut parser = SseParser::new();
        let chunks = parser.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_usage_is_a_separate_chunk() {
        let mut parser = SseParser::new();
        let chunks = parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":2,\"total_tokens\":12}}\n",
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], StreamChunk::Text("hi".to_string()));
        assert_eq!(
            chunks[1],
            StreamChunk::Usage(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            })
        );
    }

    #[test]
    fn test_trailing_buffer_flushed_on_finish() {
        let mut parser = SseParser::new();
        // Transport closed without a trailing newline or sentinel.
        let chunks = parser.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert!(chunks.is_empty());
        let flushed = parser.finish();
        assert_eq!(collect_text(&flushed), "tail");
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut parser = SseParser::new();
        let chunks = parser.feed(b": keep-alive\n\nevent: ping\ndata: [DONE]\n");
        assert_eq!(chunks, vec![StreamChunk::Done]);
    }
}
