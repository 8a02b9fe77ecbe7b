//! Newline framing for device byte streams.
//!
//! Devices write one message per line. [`LineCodec`] splits an inbound byte
//! stream on `\n`, retaining any partial tail until the rest of the line
//! arrives, and appends the delimiter to outbound frames. [`FrameReader`] owns
//! a receive buffer and drives the decoder for one connection.
//!
//! Empty lines are skipped. Lines may optionally be capped: a line longer
//! than the configured maximum is reported once as
//! [`FramingError::OversizedFrame`] and its bytes are discarded up to the next
//! delimiter, after which framing resumes normally.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Byte separating frames on the wire.
pub const DELIMITER: u8 = b'\n';

/// Default upper bound on a single frame (64 KiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Errors raised while splitting a byte stream into frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A line grew beyond the configured maximum before its delimiter arrived.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Bytes seen for the offending line when it was rejected.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An outbound frame contained the delimiter byte.
    #[error("frame contains an embedded delimiter")]
    EmbeddedDelimiter,
}

impl From<FramingError> for io::Error {
    fn from(error: FramingError) -> Self { io::Error::new(io::ErrorKind::InvalidData, error) }
}

/// `\n`-delimited frame codec.
#[derive(Clone, Debug)]
pub struct LineCodec {
    max_frame_length: Option<usize>,
    /// Number of bytes at the head of the buffer already known to hold no
    /// delimiter.
    scanned: usize,
    /// Set after an oversized line until its delimiter is consumed.
    discarding: bool,
}

impl LineCodec {
    /// Create a codec rejecting lines longer than `max_frame_length`.
    ///
    /// `None` disables the limit.
    #[must_use]
    pub fn new(max_frame_length: Option<usize>) -> Self {
        Self {
            max_frame_length,
            scanned: 0,
            discarding: false,
        }
    }

    /// Return the configured frame limit.
    #[must_use]
    pub fn max_frame_length(&self) -> Option<usize> { self.max_frame_length }

    /// Extract the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete line yet.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::OversizedFrame`] once per line exceeding the
    /// limit. The caller may keep calling this method afterwards.
    pub fn next_frame(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        loop {
            let found = src
                .iter()
                .skip(self.scanned)
                .position(|b| *b == DELIMITER)
                .map(|offset| self.scanned + offset);

            let Some(end) = found else {
                return self.hold_partial(src);
            };

            self.scanned = 0;
            let mut line = src.split_to(end + 1);
            line.truncate(end);

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if let Some(max) = self.max_frame_length
                && line.len() > max
            {
                return Err(FramingError::OversizedFrame {
                    size: line.len(),
                    max,
                });
            }
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }

    fn hold_partial(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        if self.discarding {
            src.clear();
            self.scanned = 0;
            return Ok(None);
        }
        match self.max_frame_length {
            Some(max) if src.len() > max => {
                let size = src.len();
                src.clear();
                self.scanned = 0;
                self.discarding = true;
                Err(FramingError::OversizedFrame { size, max })
            }
            _ => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self { Self::new(Some(DEFAULT_MAX_FRAME_LENGTH)) }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.next_frame(src).map_err(io::Error::from)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() && !self.discarding {
            tracing::debug!(
                bytes = src.len(),
                "discarding partial frame at end of stream"
            );
        }
        src.clear();
        self.scanned = 0;
        self.discarding = false;
        Ok(None)
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(&DELIMITER) {
            return Err(FramingError::EmbeddedDelimiter.into());
        }
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(&item);
        dst.put_u8(DELIMITER);
        Ok(())
    }
}

/// Per-connection receive buffer feeding a [`LineCodec`].
///
/// ```
/// use hubwire::frame::FrameReader;
///
/// let mut reader = FrameReader::default();
/// let frames: Vec<_> = reader.feed(b"wA1\ntp-18").into_iter().flatten().collect();
/// assert_eq!(frames, vec![bytes::Bytes::from_static(b"wA1")]);
/// let frames: Vec<_> = reader.feed(b".5\n").into_iter().flatten().collect();
/// assert_eq!(frames, vec![bytes::Bytes::from_static(b"tp-18.5")]);
/// ```
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
    codec: LineCodec,
}

impl FrameReader {
    /// Create a reader with the given frame limit.
    #[must_use]
    pub fn new(max_frame_length: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::new(),
            codec: LineCodec::new(max_frame_length),
        }
    }

    /// Append `bytes` and return every frame completed by them, in order.
    ///
    /// Framing errors are reported in place; frames after an oversized line
    /// are still returned.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Bytes, FramingError>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            match self.codec.next_frame(&mut self.buffer) {
                Ok(Some(frame)) => frames.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => frames.push(Err(e)),
            }
        }
        frames
    }

    /// Bytes retained for a frame whose delimiter has not arrived yet.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    /// Drop any partial tail, returning how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.codec = LineCodec::new(self.codec.max_frame_length());
        discarded
    }
}
