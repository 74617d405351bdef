//! Line-oriented passthrough of an upstream event stream.
//!
//! The relay pulls lines from an [`UpstreamStream`], runs each through
//! [`RelayState`] and writes the resulting [`StreamFrame`]s to a
//! [`FrameSink`], flushing after every frame. It stops at the `[DONE]`
//! sentinel even if upstream keeps the connection open.

use crate::upstream::{UpstreamError, UpstreamStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;
use log::{debug, warn};
use serde_json::json;

pub const DONE_SENTINEL: &str = "[DONE]";
pub const DATA_PREFIX: &str = "data:";

/// One unit of output written to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Data(String),
    Done,
    /// Upstream broke off mid-stream.
    Error(String),
}

impl StreamFrame {
    /// SSE encoding of the frame, including the blank separator line.
    pub fn encode(&self) -> Bytes {
        match self {
            StreamFrame::Data(payload) => Bytes::from(format!("data: {}\n\n", payload)),
            StreamFrame::Done => Bytes::from(format!("data: {}\n\n", DONE_SENTINEL)),
            StreamFrame::Error(message) => Bytes::from(format!(
                "event: error\ndata: {}\n\n",
                json!({ "error": message })
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Data(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Reading,
    Closed,
}

impl RelayState {
    /// Advances on one upstream line. Returns the frame to forward, if any.
    pub fn on_line(&mut self, line: &str) -> Option<StreamFrame> {
        if *self == RelayState::Closed {
            return None;
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return None;
        }
        let payload = strip_data_prefix(line);
        if payload == DONE_SENTINEL {
            *self = RelayState::Closed;
            return Some(StreamFrame::Done);
        }
        Some(StreamFrame::Data(payload.to_string()))
    }

    /// Upstream ran out of input or failed.
    pub fn on_end(&mut self) {
        *self = RelayState::Closed;
    }
}

fn strip_data_prefix(line: &str) -> &str {
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("upstream event line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// Splits the upstream byte stream into `\n`-terminated lines, holding at
/// most one partial line between chunks.
pub struct LineReader {
    upstream: UpstreamStream,
    buf: Vec<u8>,
    scanned: usize,
    max_line_bytes: usize,
    eof: bool,
}

impl LineReader {
    pub fn new(upstream: UpstreamStream, max_line_bytes: usize) -> Self {
        Self {
            upstream,
            buf: Vec::new(),
            scanned: 0,
            max_line_bytes,
            eof: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>, ReadError> {
        loop {
            if let Some(pos) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + pos;
                if end > self.max_line_bytes {
                    return Err(ReadError::LineTooLong {
                        limit: self.max_line_bytes,
                    });
                }
                let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf.drain(..=end);
                self.scanned = 0;
                return Ok(Some(line));
            }
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_line_bytes {
                return Err(ReadError::LineTooLong {
                    limit: self.max_line_bytes,
                });
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                self.scanned = 0;
                return Ok(Some(line));
            }

            match self.upstream.next_chunk().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e.into()),
                None => self.eof = true,
            }
        }
    }

    pub fn close(self) {
        self.upstream.close();
    }
}

#[derive(Debug, thiserror::Error)]
#[error("caller disconnected")]
pub struct SinkClosed;

/// Delivery surface that can push a frame to the caller immediately.
#[async_trait]
pub trait FrameSink: Send {
    /// Whether frames can be flushed one at a time. Sinks that can only
    /// deliver a buffered body return false and are refused by the relay.
    fn supports_flush(&self) -> bool {
        true
    }

    async fn write_frame(&mut self, frame: &StreamFrame) -> Result<(), SinkClosed>;

    async fn flush(&mut self) -> Result<(), SinkClosed>;
}

/// Sink backed by a bounded channel whose receiver is the HTTP response
/// body. A full channel suspends the writer; a dropped receiver means the
/// caller went away.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    pending: Vec<Bytes>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                pending: Vec::new(),
            },
            rx,
        )
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write_frame(&mut self, frame: &StreamFrame) -> Result<(), SinkClosed> {
        if self.tx.is_closed() {
            return Err(SinkClosed);
        }
        self.pending.push(frame.encode());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkClosed> {
        for bytes in self.pending.drain(..) {
            self.tx.send(bytes).await.map_err(|_| SinkClosed)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `[DONE]` was forwarded.
    Completed,
    /// Upstream reached end of input without the sentinel.
    UpstreamClosed,
    /// Reading upstream failed after the stream started.
    UpstreamFailed(String),
    /// The caller stopped accepting frames.
    CallerGone,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("streaming not supported")]
    StreamingUnsupported,
}

#[derive(Debug, Clone, Copy)]
pub struct Relay {
    max_line_bytes: usize,
}

impl Relay {
    pub fn new(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }

    pub async fn run<S>(
        &self,
        upstream: UpstreamStream,
        sink: &mut S,
    ) -> Result<RelayOutcome, RelayError>
    where
        S: FrameSink + ?Sized,
    {
        if !sink.supports_flush() {
            upstream.close();
            return Err(RelayError::StreamingUnsupported);
        }

        let mut reader = LineReader::new(upstream, self.max_line_bytes);
        let mut state = RelayState::Reading;
        let mut frames = 0usize;

        let outcome = loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    state.on_end();
                    break RelayOutcome::UpstreamClosed;
                }
                Err(e) => {
                    state.on_end();
                    let message = e.to_string();
                    warn!("Upstream stream failed after {} frames: {}", frames, message);
                    // Best effort: the caller may already be gone.
                    let _ = deliver(sink, &StreamFrame::Error(message.clone())).await;
                    break RelayOutcome::UpstreamFailed(message);
                }
            };

            let Some(frame) = state.on_line(&line) else {
                continue;
            };
            if deliver(sink, &frame).await.is_err() {
                debug!("Caller disconnected after {} frames", frames);
                break RelayOutcome::CallerGone;
            }
            frames += 1;
            if state == RelayState::Closed {
                break RelayOutcome::Completed;
            }
        };

        reader.close();
        debug!("Relay closed: {:?} ({} frames)", outcome, frames);
        Ok(outcome)
    }
}

async fn deliver<S>(sink: &mut S, frame: &StreamFrame) -> Result<(), SinkClosed>
where
    S: FrameSink + ?Sized,
{
    sink.write_frame(frame).await?;
    sink.flush().await
}
