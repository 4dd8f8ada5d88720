//! Newline-delimited JSON codec for worker communication.
//!
//! Uses AnyDelimiterCodec for line framing + serde_json for serialization.
//! Works over any AsyncRead/AsyncWrite (pipes, sockets, etc).
//!
//! Unlike a plain decoding codec, a line that fails to parse is not an error:
//! `FramedRead` ends the stream after the first decoder error, and one bad
//! line from the worker must not take down the reader. Such lines come out
//! as [`Frame::Malformed`] and the stream continues.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

/// Longest line accepted from a worker before it is discarded as malformed.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

const EXCERPT_CHARS: usize = 200;

/// A decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    Message(T),
    Malformed(MalformedLine),
}

/// A line that could not be decoded, kept for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedLine {
    /// Leading part of the line, lossily decoded.
    pub excerpt: String,
    pub reason: String,
}

impl MalformedLine {
    fn new(bytes: &[u8], reason: impl Into<String>) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let excerpt = match text.char_indices().nth(EXCERPT_CHARS) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        };
        Self {
            excerpt,
            reason: reason.into(),
        }
    }
}

/// Codec that frames messages one per line and serializes with JSON.
///
/// Wraps AnyDelimiterCodec and adds serde_json serialization.
pub struct JsonLineCodec<T> {
    inner: AnyDelimiterCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLineCodec<T> {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> JsonLineCodec<T> {
    fn parse(line: Bytes) -> Option<Frame<T>> {
        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        let frame = match std::str::from_utf8(line) {
            Err(e) => Frame::Malformed(MalformedLine::new(line, format!("invalid UTF-8: {e}"))),
            Ok(text) => match serde_json::from_str(text) {
                Ok(item) => Frame::Message(item),
                Err(e) => Frame::Malformed(MalformedLine::new(line, e.to_string())),
            },
        };
        Some(frame)
    }

    fn next_frame(
        &mut self,
        src: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<Frame<T>>, io::Error> {
        loop {
            let chunk = if eof {
                self.inner.decode_eof(src)
            } else {
                self.inner.decode(src)
            };
            match chunk {
                Ok(Some(line)) => {
                    if let Some(frame) = Self::parse(line) {
                        return Ok(Some(frame));
                    }
                }
                Ok(None) => return Ok(None),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    let max = self.inner.max_length();
                    let head = &src[..src.len().min(EXCERPT_CHARS)];
                    return Ok(Some(Frame::Malformed(MalformedLine::new(
                        head,
                        format!("line exceeds {max} bytes"),
                    ))));
                }
                Err(AnyDelimiterCodecError::Io(e)) => return Err(e),
            }
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = Frame<T>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_frame(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_frame(src, true)
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding line");
        self.inner.encode(json, dst).map_err(|e| match e {
            AnyDelimiterCodecError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}
