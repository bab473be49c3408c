//! Server-sent-events framing shared by the HTTP backends.
//!
//! Bytes are buffered until a full line arrives, so a frame split across
//! network chunks (or a multi-byte character split across them) decodes
//! the same as one delivered whole.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;

use super::{BackendError, FragmentStream};

/// One decoded `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, BackendError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = Self::decode_line(&line[..line.len() - 1])? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Result<Option<SseFrame>, BackendError> {
        let line = std::mem::take(&mut self.buffer);
        Self::decode_line(&line)
    }

    fn decode_line(raw: &[u8]) -> Result<Option<SseFrame>, BackendError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| BackendError::MalformedFrame(format!("invalid UTF-8: {}", e)))?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        // Blank separators, comments and non-data fields carry no payload
        let Some(payload) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload);

        if payload.trim() == "[DONE]" {
            Ok(Some(SseFrame::Done))
        } else if payload.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(SseFrame::Data(payload.to_string())))
        }
    }
}

/// Backend-specific interpretation of `data:` payloads
pub(crate) trait FrameParser: Send + 'static {
    /// Text carried by one payload, if any
    fn parse(&mut self, payload: &str) -> Result<Option<String>, BackendError>;

    /// Trailing fragment emitted once the stream ends cleanly
    fn finish(&mut self) -> Option<String> {
        None
    }
}

struct SseState<P> {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    parser: P,
    pending: VecDeque<String>,
    error: Option<BackendError>,
    done: bool,
}

impl<P: FrameParser> SseState<P> {
    fn absorb(&mut self, frames: Vec<SseFrame>) {
        for frame in frames {
            match frame {
                SseFrame::Data(payload) => match self.parser.parse(&payload) {
                    Ok(Some(text)) => self.pending.push_back(text),
                    Ok(None) => {}
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                },
                SseFrame::Done => {
                    self.end();
                    return;
                }
            }
        }
    }

    fn end(&mut self) {
        if let Some(tail) = self.parser.finish() {
            self.pending.push_back(tail);
        }
        self.done = true;
    }

    fn fail(&mut self, error: BackendError) {
        self.error = Some(error);
        self.done = true;
    }
}

/// Turn a successful streaming response into a fragment stream.
///
/// A stream that ends without `[DONE]` is accepted as finished.
pub(crate) fn fragment_stream<P: FrameParser>(
    response: reqwest::Response,
    parser: P,
) -> FragmentStream {
    let state = SseState {
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        decoder: SseDecoder::new(),
        parser,
        pending: VecDeque::new(),
        error: None,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if let Some(error) = state.error.take() {
                return Some((Err(error), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(frames) => state.absorb(frames),
                    Err(e) => state.fail(e),
                },
                Some(Err(e)) => state.fail(BackendError::Unreachable(e.to_string())),
                None => match state.decoder.finish() {
                    Ok(Some(frame)) => {
                        state.absorb(vec![frame]);
                        if !state.done {
                            state.end();
                        }
                    }
                    Ok(None) => state.end(),
                    Err(e) => state.fail(e),
                },
            }
        }
    })
    .boxed()
}
