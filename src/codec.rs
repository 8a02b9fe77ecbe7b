//! Pluggable message codecs for device wire formats.
//!
//! A codec turns one newline-stripped frame into a [`Message`] and turns a
//! [`Command`] back into a delimited frame. It is the only place that knows
//! the wire format: the connection supervisor and device registry work purely
//! in terms of [`Message`] values and [`Bytes`].
//!
//! Two formats are provided:
//!
//! - [`JsonCodec`]: one JSON object per line with `dev`/`tp` fields.
//! - [`CompactCodec`]: short ASCII commands such as `HCpA-20` or `tp-18.5;4.2`.
//!
//! The format is chosen per deployment through
//! [`WireFormat`](crate::config::WireFormat).

use bytes::Bytes;

use crate::message::{Command, DeviceId, Message};

pub mod compact;
pub mod error;
pub mod json;

pub use compact::{CompactCodec, PrefixRule};
pub use error::{DecodeError, EncodeError};
pub use json::JsonCodec;

/// Parse and serialize one wire format.
///
/// Implementations must be cheap to share; the supervisor holds a single
/// instance behind an `Arc` for every connection.
pub trait MessageCodec: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decode one frame (without its delimiter).
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the frame is not valid for this format.
    fn parse(&self, frame: &[u8]) -> Result<Message, DecodeError>;

    /// Encode `command` for `device`, including the trailing delimiter.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] when the command cannot be expressed in this
    /// format.
    fn serialize(&self, device: &DeviceId, command: &Command) -> Result<Bytes, EncodeError>;
}
