//! Decoding of the backend's streaming body.
//!
//! The body is a sequence of newline-terminated frames. Blank lines are
//! ignored; every other frame of interest looks like
//! `data: {"type":"delta","content":"Hi"}`. A frame whose payload is not a
//! recognised event is kept as literal text rather than dropped.

use serde::Deserialize;

use crate::state::Usage;

pub const DATA_PREFIX: &str = "data: ";

/// One decoded event of a model's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text fragment to append.
    Delta(String),
    /// The model finished.
    Done {
        latency: Option<f64>,
        usage: Option<Usage>,
    },
    /// The model failed; carries the server's message when it sent one.
    Error(Option<String>),
    /// A frame that was not a structured event, appended verbatim.
    Literal(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Frame {
    Delta {
        #[serde(default)]
        content: Option<String>,
    },
    Done {
        #[serde(default)]
        latency: Option<f64>,
        #[serde(default)]
        usage: Option<Usage>,
    },
    Error {
        #[serde(default)]
        content: Option<String>,
    },
}

/// Parses a frame payload (prefix already stripped). Never fails.
pub fn parse_event(data: &str) -> StreamEvent {
    match serde_json::from_str::<Frame>(data) {
        Ok(Frame::Delta { content }) => StreamEvent::Delta(content.unwrap_or_default()),
        Ok(Frame::Done { latency, usage }) => StreamEvent::Done { latency, usage },
        Ok(Frame::Error { content }) => StreamEvent::Error(content),
        Err(_) => StreamEvent::Literal(data.to_string()),
    }
}

/// Splits incoming body chunks into lines and decodes the `data: ` ones.
///
/// Bytes are buffered until a newline arrives, so a frame (or a multi-byte
/// character) split across reads is decoded once it is complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// `buffer[..scanned]` holds no newline.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if let Some(event) = decode_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        events
    }

    /// Decodes whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(raw);
    text.trim().strip_prefix(DATA_PREFIX).map(parse_event)
}
