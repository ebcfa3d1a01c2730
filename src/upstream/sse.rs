//! Incremental Server-Sent Events decoding for the upstream stream.
//!
//! Network chunks split SSE frames at arbitrary byte offsets, so the decoder
//! buffers partial lines and only yields a frame once its terminating blank
//! line has arrived.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::trace;

use crate::error::UpstreamError;
use crate::upstream::types::UpstreamEvent;

/// Sentinel some providers send after the last event.
const DONE_SENTINEL: &str = "[DONE]";

/// Longest unterminated line the decoder will hold.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Line-oriented SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    ///
    /// Fails once a single line grows past [`MAX_LINE_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, UpstreamError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(self.scanned + offset);
            self.buf.advance(1);
            self.scanned = 0;

            let text = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(text.strip_suffix('\r').unwrap_or(&text)) {
                frames.push(frame);
            }
        }
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_BYTES {
            return Err(UpstreamError::Stream(format!(
                "upstream SSE line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(frames)
    }

    /// Flush a frame left unterminated when the stream closed.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buf.is_empty() {
            self.scanned = 0;
            let rest = self.buf.split();
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // id / retry are irrelevant for a one-shot relay.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

struct DecodeState<E> {
    bytes: BoxStream<'static, Result<Bytes, E>>,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    exhausted: bool,
}

/// Turn an upstream byte stream into a stream of decoded [`UpstreamEvent`]s.
///
/// The returned stream ends after the first error it yields.
pub fn decode_events<S, E>(bytes: S) -> impl Stream<Item = Result<UpstreamEvent, UpstreamError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<UpstreamError> + Send + 'static,
{
    let state = DecodeState {
        bytes: bytes.boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut st = state?;
        loop {
            if let Some(frame) = st.pending.pop_front() {
                if frame.data.trim() == DONE_SENTINEL {
                    continue;
                }
                trace!(event = ?frame.event, bytes = frame.data.len(), "Upstream SSE frame");
                return match UpstreamEvent::parse(&frame.data) {
                    Ok(event) => Some((Ok(event), Some(st))),
                    Err(e) => Some((Err(e), None)),
                };
            }

            if st.exhausted {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => match st.decoder.push(&chunk) {
                    Ok(frames) => st.pending.extend(frames),
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Err(e)) => return Some((Err(e.into()), None)),
                None => {
                    st.exhausted = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    })
}
