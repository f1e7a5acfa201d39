use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::models::ToolCallChunk;

/// One typed event of the chat stream, discriminated by the payload's `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        content: String,
    },
    ToolStart {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolCallChunk {
        chunk: ToolCallChunk,
    },
    ToolEnd {
        name: String,
    },
    Error {
        message: String,
    },
    End,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End)
    }
}

/// Incremental decoder for `data: <json>\n\n` frames.
///
/// Bytes are buffered until a blank line closes a frame; nothing is emitted for
/// an incomplete tail. Buffering raw bytes (not `str`) keeps multi-byte
/// characters that straddle two chunks intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((frame_end, delimiter_len)) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..frame_end + delimiter_len).collect();
            if let Some(event) = decode_frame(&frame[..frame_end]) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received so far that do not yet form a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Ends decoding. An incomplete trailing frame is dropped, never guessed at;
    /// returns how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!("Discarding {dropped} bytes of incomplete stream frame");
        }
        self.buffer.clear();
        dropped
    }
}

/// Position of the newline that starts a blank line, and the delimiter length.
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    buffer.iter().enumerate().find_map(|(i, byte)| {
        if *byte != b'\n' {
            return None;
        }
        match (buffer.get(i + 1), buffer.get(i + 2)) {
            (Some(b'\n'), _) => Some((i, 2)),
            (Some(b'\r'), Some(b'\n')) => Some((i, 3)),
            _ => None,
        }
    })
}

fn decode_frame(frame: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(frame);
    let data_lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();

    if data_lines.is_empty() {
        // comment or keep-alive frame
        return None;
    }

    let payload = data_lines.join("\n");
    match serde_json::from_str::<StreamEvent>(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Failed to parse stream event: {e}, data: {payload}");
            let error = ClientError::Decode { message: e.to_string() };
            Some(StreamEvent::Error { message: error.to_string() })
        }
    }
}
