//! Error types for the codec layer.
//!
//! Decode errors are per-frame: the connection logs them, drops the frame and
//! keeps reading. Encode errors are returned to the caller of
//! [`CommandSender::try_send`](crate::sender::CommandSender::try_send).

use thiserror::Error;

/// Reasons a frame could not be decoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid UTF-8 or not a well-formed message object.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The frame does not identify its sender.
    #[error("message has no device id")]
    MissingDeviceId,

    /// The frame does not declare a message type.
    #[error("message has no type")]
    MissingKind,

    /// The declared type or prefix is not recognised.
    #[error("unknown message type: {0}")]
    UnknownKind(String),

    /// The frame is well-formed but its payload cannot be interpreted.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Reasons a command could not be encoded.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON serialization failed.
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload or action cannot be expressed in this format.
    #[error("{format} format cannot carry this payload")]
    UnsupportedPayload {
        /// Codec name.
        format: &'static str,
    },

    /// The device id is not valid for this format.
    #[error("invalid device id for {format} format: {device}")]
    InvalidDeviceId {
        /// Codec name.
        format: &'static str,
        /// Offending id.
        device: String,
    },

    /// The command name is not valid for this format.
    #[error("invalid command name for {format} format: {name}")]
    InvalidCommandName {
        /// Codec name.
        format: &'static str,
        /// Offending name.
        name: String,
    },

    /// The encoded frame would contain the frame delimiter.
    #[error("encoded command contains a newline")]
    EmbeddedDelimiter,
}
