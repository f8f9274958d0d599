//! Stream accumulation over agent responses of unknown streaming shape.
//!
//! A transport cannot promise ahead of time how a response will stream, so
//! a [`StreamBody`] carries whichever capability slots the transport could
//! produce and [`StreamBody::probe`] picks the highest-priority one that is
//! present: callback-driven, chunked text, raw bytes, then static content.
//! The [`Accumulator`] drains the chosen protocol chunk by chunk, keeps the
//! concatenated text, and publishes throttled partial snapshots for display.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::throttle::Throttle;

/// Chunk size for the static-content fallback split.
const STATIC_CHUNK_CHARS: usize = 50;
/// Artificial delay between static fallback chunks.
const STATIC_CHUNK_DELAY: Duration = Duration::from_millis(30);
/// Minimum spacing between published partial-text snapshots.
const PARTIAL_UPDATE_INTERVAL: Duration = Duration::from_millis(80);
/// An inter-chunk gap under this counts as genuinely incremental delivery.
const INCREMENTAL_GAP: Duration = Duration::from_secs(1);

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("no streaming protocol produced any text")]
    NoProtocol,
    #[error("stream transport failed: {0}")]
    Transport(String),
    #[error("stream protocol failed: {0}")]
    Protocol(String),
}

/// Events a [`CallbackSource`] reports while driving itself.
enum CallbackEvent {
    Text(String),
    Failed(String),
    Complete,
}

/// Named callbacks handed to a [`CallbackSource`].
pub struct StreamCallbacks {
    events: mpsc::UnboundedSender<CallbackEvent>,
}

impl StreamCallbacks {
    pub fn text_part(&self, part: &str) {
        let _ = self.events.send(CallbackEvent::Text(part.to_string()));
    }

    pub fn error(&self, message: &str) {
        let _ = self.events.send(CallbackEvent::Failed(message.to_string()));
    }

    pub fn complete(&self) {
        let _ = self.events.send(CallbackEvent::Complete);
    }
}

/// Callback-driven streaming: the source runs itself to completion, pushing
/// text parts through the supplied callbacks as they arrive.
pub trait CallbackSource: Send {
    fn drive(
        self: Box<Self>,
        callbacks: StreamCallbacks,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A streaming response as produced by the transport. Slots are capability
/// hints; consumption order is decided by [`StreamBody::probe`], not by the
/// transport.
#[derive(Default)]
pub struct StreamBody {
    pub callback: Option<Box<dyn CallbackSource>>,
    pub chunks: Option<ChunkStream>,
    pub bytes: Option<ByteStream>,
    pub content: Option<Value>,
}

/// The protocol a probe matched, in priority order.
pub enum StreamSource {
    Callback(Box<dyn CallbackSource>),
    Chunked(ChunkStream),
    Raw(ByteStream),
    Whole(Value),
}

impl StreamBody {
    /// Take the highest-priority capability still available.
    pub fn probe(&mut self) -> Option<StreamSource> {
        if let Some(source) = self.callback.take() {
            return Some(StreamSource::Callback(source));
        }
        if let Some(stream) = self.chunks.take() {
            return Some(StreamSource::Chunked(stream));
        }
        if let Some(stream) = self.bytes.take() {
            return Some(StreamSource::Raw(stream));
        }
        if let Some(value) = self.content.take() {
            return Some(StreamSource::Whole(value));
        }
        None
    }
}

/// Observations about how a stream actually behaved. Informational only -
/// never consulted by accumulation or fallback decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamDiagnostics {
    pub chunk_count: usize,
    /// More than one chunk arrived.
    pub multi_chunk: bool,
    /// At least one inter-chunk gap was under a second.
    pub incremental_delivery: bool,
}

/// Per-request chunk accumulator.
///
/// The buffer only ever grows within one session; a new request gets a new
/// accumulator. Partial text is published through the paired watch receiver
/// under a redraw-rate cap, and the terminal state is always published once
/// draining finishes.
pub struct Accumulator {
    buffer: String,
    chunk_count: usize,
    last_chunk_at: Option<Instant>,
    incremental_gap_seen: bool,
    throttle: Throttle,
    partial: watch::Sender<String>,
}

impl Accumulator {
    pub fn new() -> (Self, watch::Receiver<String>) {
        let (partial, receiver) = watch::channel(String::new());
        (
            Self {
                buffer: String::new(),
                chunk_count: 0,
                last_chunk_at: None,
                incremental_gap_seen: false,
                throttle: Throttle::new(PARTIAL_UPDATE_INTERVAL),
                partial,
            },
            receiver,
        )
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        StreamDiagnostics {
            chunk_count: self.chunk_count,
            multi_chunk: self.chunk_count > 1,
            incremental_delivery: self.incremental_gap_seen,
        }
    }

    /// Drain `body` into accumulated text, invoking `on_chunk` once per
    /// chunk in arrival order.
    ///
    /// Protocols are tried in probe order. A protocol that fails or
    /// completes without having produced any text falls through to the
    /// next; a protocol that fails after text was produced surfaces the
    /// partial text as the final result. [`StreamError::NoProtocol`] is
    /// returned only when every protocol was exhausted without any text.
    pub async fn drain(
        &mut self,
        mut body: StreamBody,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, StreamError> {
        while let Some(source) = body.probe() {
            let attempt = match source {
                StreamSource::Callback(source) => self.drain_callback(source, on_chunk).await,
                StreamSource::Chunked(stream) => self.drain_chunks(stream, on_chunk).await,
                StreamSource::Raw(stream) => self.drain_bytes(stream, on_chunk).await,
                StreamSource::Whole(value) => self.drain_whole(value, on_chunk).await,
            };
            match attempt {
                Ok(()) if self.chunk_count > 0 => return Ok(self.finish()),
                Ok(()) => debug!("stream protocol completed without text, probing next"),
                Err(error) if self.chunk_count > 0 => {
                    warn!(%error, "stream failed mid-flight, keeping partial text");
                    return Ok(self.finish());
                }
                Err(error) => {
                    debug!(%error, "stream protocol produced nothing, probing next");
                }
            }
        }
        Err(StreamError::NoProtocol)
    }

    fn push_chunk(&mut self, chunk: &str, on_chunk: &mut (dyn FnMut(&str) + Send)) {
        let now = Instant::now();
        if let Some(previous) = self.last_chunk_at {
            if now.duration_since(previous) < INCREMENTAL_GAP {
                self.incremental_gap_seen = true;
            }
        }
        self.last_chunk_at = Some(now);
        self.chunk_count += 1;
        self.buffer.push_str(chunk);
        on_chunk(chunk);
        if self.throttle.admit(now) {
            let _ = self.partial.send(self.buffer.clone());
        }
    }

    fn finish(&mut self) -> String {
        // Trailing guarantee: the last chunk's contribution is always
        // visible, whatever the throttle suppressed along the way.
        let _ = self.partial.send(self.buffer.clone());
        let diagnostics = self.diagnostics();
        debug!(
            chunks = diagnostics.chunk_count,
            multi_chunk = diagnostics.multi_chunk,
            incremental = diagnostics.incremental_delivery,
            "stream drained"
        );
        self.buffer.clone()
    }

    async fn drain_callback(
        &mut self,
        source: Box<dyn CallbackSource>,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), StreamError> {
        let (events, mut receiver) = mpsc::unbounded_channel();
        let driver = tokio::spawn(source.drive(StreamCallbacks { events }));

        let mut failure = None;
        while let Some(event) = receiver.recv().await {
            match event {
                CallbackEvent::Text(part) => self.push_chunk(&part, on_chunk),
                CallbackEvent::Failed(message) => {
                    failure = Some(message);
                    break;
                }
                CallbackEvent::Complete => break,
            }
        }
        receiver.close();
        let _ = driver.await;

        match failure {
            Some(message) => Err(StreamError::Protocol(message)),
            None => Ok(()),
        }
    }

    async fn drain_chunks(
        &mut self,
        mut stream: ChunkStream,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), StreamError> {
        while let Some(item) = stream.next().await {
            let chunk = item?;
            self.push_chunk(&chunk, on_chunk);
        }
        Ok(())
    }

    async fn drain_bytes(
        &mut self,
        mut stream: ByteStream,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), StreamError> {
        let mut carry: Vec<u8> = Vec::new();
        while let Some(item) = stream.next().await {
            carry.extend_from_slice(&item?);
            let decoded = take_utf8_prefix(&mut carry);
            if !decoded.is_empty() {
                self.push_chunk(&decoded, on_chunk);
            }
        }
        if !carry.is_empty() {
            // A sequence that never completed; decode it lossily rather
            // than drop the tail.
            let tail = String::from_utf8_lossy(&carry).into_owned();
            self.push_chunk(&tail, on_chunk);
        }
        Ok(())
    }

    async fn drain_whole(
        &mut self,
        value: Value,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), StreamError> {
        let text = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        let characters: Vec<char> = text.chars().collect();
        for (index, piece) in characters.chunks(STATIC_CHUNK_CHARS).enumerate() {
            if index > 0 {
                tokio::time::sleep(STATIC_CHUNK_DELAY).await;
            }
            let piece: String = piece.iter().collect();
            self.push_chunk(&piece, on_chunk);
        }
        Ok(())
    }
}

/// Decode the longest complete-UTF-8 prefix of `buf`, leaving a trailing
/// partial multi-byte sequence in place for the next read. Genuinely
/// invalid bytes are replaced rather than carried forever.
fn take_utf8_prefix(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(valid) => {
                out.push_str(valid);
                buf.clear();
                return out;
            }
            Err(error) => {
                let valid_len = error.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[..valid_len]));
                match error.error_len() {
                    Some(invalid_len) => {
                        out.push('\u{FFFD}');
                        buf.drain(..valid_len + invalid_len);
                    }
                    None => {
                        buf.drain(..valid_len);
                        return out;
                    }
                }
            }
        }
    }
}
