//! Compact ASCII wire format used by the environmental controllers.
//!
//! Controllers report telemetry without naming themselves, so every inbound
//! frame except an echoed command is attributed to the codec's default
//! device:
//!
//! - **Prefixed telemetry**: a lowercase prefix classified by a prefix table,
//!   longest prefix first. `tp-18.5;4.2;21.3` reports zone temperatures and
//!   `wA1` raises the warning for zone `A`.
//! - **Fan status**: `<zone><mode><speed>`, such as `AC2` (zone `A`,
//!   cooling, speed 2) or `BH1`.
//! - **Command**: `<device>C<name><args>`. `HCpA-20` is a set-point command
//!   (`p`) for device `H` with arguments `A-20`. Commands are only written by
//!   the hub; decoding them exists so frames round-trip.
//!
//! Payloads stay as text; [`telemetry`] decodes them.

use bytes::{BufMut, Bytes, BytesMut};

use super::{DecodeError, EncodeError, MessageCodec};
use crate::{
    frame::DELIMITER,
    message::{Command, DeviceId, Message, MessageKind, Payload},
};

pub mod telemetry;

/// Maps a telemetry prefix to a message kind and name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixRule {
    /// Leading characters identifying the frame.
    pub prefix: String,
    /// Kind assigned to matching frames.
    pub kind: MessageKind,
    /// Name assigned to matching frames.
    pub name: String,
}

impl PrefixRule {
    /// Create a rule.
    #[must_use]
    pub fn new(prefix: impl Into<String>, kind: MessageKind, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
            name: name.into(),
        }
    }
}

/// Prefix table understood by the stock controllers.
#[must_use]
pub fn default_rules() -> Vec<PrefixRule> {
    vec![
        PrefixRule::new("tp", MessageKind::Event, telemetry::TEMPERATURE),
        PrefixRule::new("w", MessageKind::Event, telemetry::WARNING),
    ]
}

const COMMAND_LETTER: u8 = b'C';

/// `<zone><mode><speed>` with a speed of 0 to 3.
fn is_fan_status(bytes: &[u8]) -> bool {
    matches!(
        bytes,
        [zone, mode, b'0'..=b'3'] if zone.is_ascii_uppercase() && mode.is_ascii_alphabetic()
    )
}

/// Codec for compact fixed-prefix text frames.
#[derive(Clone, Debug)]
pub struct CompactCodec {
    default_device: DeviceId,
    rules: Vec<PrefixRule>,
}

impl CompactCodec {
    /// Create a codec attributing telemetry frames to `default_device`.
    #[must_use]
    pub fn new(default_device: impl Into<DeviceId>) -> Self {
        Self::with_rules(default_device, default_rules())
    }

    /// Create a codec with a custom telemetry prefix table.
    #[must_use]
    pub fn with_rules(default_device: impl Into<DeviceId>, mut rules: Vec<PrefixRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            default_device: default_device.into(),
            rules,
        }
    }

    /// Device assigned to telemetry frames.
    #[must_use]
    pub fn default_device(&self) -> &DeviceId { &self.default_device }

    fn parse_command(text: &str) -> Result<Message, DecodeError> {
        let bytes = text.as_bytes();
        let (Some(&device), Some(&name)) = (bytes.first(), bytes.get(2)) else {
            return Err(DecodeError::MalformedPayload(format!(
                "command frame too short: {text:?}"
            )));
        };
        if !name.is_ascii_alphabetic() {
            return Err(DecodeError::MalformedPayload(format!(
                "invalid command name in {text:?}"
            )));
        }
        let rest = text.get(3..).unwrap_or_default();

        Ok(Message::new(char::from(device).to_string(), MessageKind::Command)
            .with_name(char::from(name))
            .with_payload(Payload::Text(rest.to_owned())))
    }

    fn parse_fan_status(&self, text: &str) -> Message {
        Message::new(self.default_device.clone(), MessageKind::Event)
            .with_name(telemetry::FAN)
            .with_payload(Payload::Text(text.to_owned()))
    }

    fn parse_telemetry(&self, text: &str) -> Result<Message, DecodeError> {
        let rule = self
            .rules
            .iter()
            .find(|rule| text.starts_with(rule.prefix.as_str()))
            .ok_or_else(|| DecodeError::UnknownKind(text.chars().take(2).collect()))?;
        let rest = text.get(rule.prefix.len()..).unwrap_or_default();

        Ok(Message::new(self.default_device.clone(), rule.kind)
            .with_name(rule.name.clone())
            .with_payload(Payload::Text(rest.to_owned())))
    }

    fn args<'a>(&self, command: &'a Command) -> Result<&'a str, EncodeError> {
        let unsupported = || EncodeError::UnsupportedPayload {
            format: self.name(),
        };
        if command.action.is_some() {
            return Err(unsupported());
        }
        let args = match &command.payload {
            Payload::Text(text) => text.as_str(),
            Payload::Json(serde_json::Value::Null) => "",
            Payload::Json(_) => return Err(unsupported()),
        };
        if args.as_bytes().contains(&DELIMITER) {
            return Err(EncodeError::EmbeddedDelimiter);
        }
        if !args.is_ascii() {
            return Err(unsupported());
        }
        Ok(args)
    }
}

impl Default for CompactCodec {
    fn default() -> Self { Self::new("H") }
}

impl MessageCodec for CompactCodec {
    fn name(&self) -> &'static str { "compact" }

    fn parse(&self, frame: &[u8]) -> Result<Message, DecodeError> {
        let text =
            std::str::from_utf8(frame).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
        if !text.is_ascii() {
            return Err(DecodeError::InvalidEncoding(
                "compact frames must be ASCII".to_owned(),
            ));
        }
        match text.as_bytes() {
            [] => Err(DecodeError::MalformedPayload("empty frame".to_owned())),
            bytes if is_fan_status(bytes) => Ok(self.parse_fan_status(text)),
            [first, COMMAND_LETTER, ..] if first.is_ascii_uppercase() => Self::parse_command(text),
            [first, ..] if first.is_ascii_uppercase() => Err(DecodeError::UnknownKind(
                text.chars().take(2).collect(),
            )),
            _ => self.parse_telemetry(text),
        }
    }

    fn serialize(&self, device: &DeviceId, command: &Command) -> Result<Bytes, EncodeError> {
        let device_byte = match device.as_str().as_bytes() {
            [b] if b.is_ascii_uppercase() => *b,
            _ => {
                return Err(EncodeError::InvalidDeviceId {
                    format: self.name(),
                    device: device.to_string(),
                });
            }
        };
        let name_byte = match command.name.as_bytes() {
            [b] if b.is_ascii_alphabetic() => *b,
            _ => {
                return Err(EncodeError::InvalidCommandName {
                    format: self.name(),
                    name: command.name.clone(),
                });
            }
        };
        let args = self.args(command)?;

        let mut frame = BytesMut::with_capacity(args.len() + 4);
        frame.put_u8(device_byte);
        frame.put_u8(COMMAND_LETTER);
        frame.put_u8(name_byte);
        frame.extend_from_slice(args.as_bytes());
        frame.put_u8(DELIMITER);
        Ok(frame.freeze())
    }
}
