//! Decoded device messages and outbound commands.
//!
//! Both wire formats decode into the same [`Message`] record so that the
//! registry and dispatch table never need to know which codec produced it.
//! The payload keeps the shape of its source format: structured frames carry a
//! JSON value, compact frames carry the kind-specific remainder as text.

use std::{borrow::Borrow, fmt, sync::Arc};

use serde_json::{Map, Value};

/// Identifier a device declares for itself in its first message.
///
/// Cloning is cheap; the string is shared.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Create a new [`DeviceId`] from any string-like value.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self { Self(Arc::from(id.as_ref())) }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self { Self::new(value) }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self { Self(Arc::from(value)) }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str { &self.0 }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Dispatch category of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Unsolicited notification from a device (`evt`).
    Event,
    /// Reply to a previously sent command (`res`).
    Response,
    /// Error report from a device (`err`).
    Error,
    /// Command addressed to a device (`cmd`).
    Command,
}

impl MessageKind {
    /// Short wire token used by the structured format.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Event => "evt",
            Self::Response => "res",
            Self::Error => "err",
            Self::Command => "cmd",
        }
    }

    /// Parse a short (`evt`) or long (`event`) kind token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "evt" | "event" => Some(Self::Event),
            "res" | "response" => Some(Self::Response),
            "err" | "error" => Some(Self::Error),
            "cmd" | "command" => Some(Self::Command),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.token()) }
}

/// Message body in the shape of the format that carried it.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Structured payload (`val` field); `Null` when absent.
    Json(Value),
    /// Kind-specific remainder of a compact frame.
    Text(String),
}

impl Payload {
    /// An empty structured payload.
    #[must_use]
    pub const fn empty() -> Self { Self::Json(Value::Null) }

    /// Return the JSON value if this payload is structured.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Return the text if this payload came from a compact frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

impl Default for Payload {
    fn default() -> Self { Self::empty() }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Device that sent the frame.
    pub device: DeviceId,
    /// Dispatch category.
    pub kind: MessageKind,
    /// Event, response, error or command name, when the format carries one.
    pub name: Option<String>,
    /// Optional action qualifier (`act`).
    pub action: Option<String>,
    /// Message body.
    pub payload: Payload,
    /// Fields the format carried outside the ones above, such as the `cmd` a
    /// response answers or a device timestamp.
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a message without a name, action or payload.
    #[must_use]
    pub fn new(device: impl Into<DeviceId>, kind: MessageKind) -> Self {
        Self {
            device: device.into(),
            kind,
            name: None,
            action: None,
            payload: Payload::empty(),
            extra: Map::new(),
        }
    }

    /// Look up an additional wire field by name.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> { self.extra.get(key) }

    /// Set the message name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the action qualifier.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Keep an additional wire field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A command to be serialized and written to one device.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Command name (`cmd` in JSON, the command letter in compact frames).
    pub name: String,
    /// Optional action (`act`), structured format only.
    pub action: Option<String>,
    /// Command arguments.
    pub payload: Payload,
}

impl Command {
    /// Create a command with no action and an empty payload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
            payload: Payload::empty(),
        }
    }

    /// Set the action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attach structured parameters.
    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.payload = Payload::Json(value);
        self
    }

    /// Attach compact argument characters.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.payload = Payload::Text(text.into());
        self
    }

    /// View this command as the message a device would decode from it.
    #[must_use]
    pub fn to_message(&self, device: &DeviceId) -> Message {
        Message {
            device: device.clone(),
            kind: MessageKind::Command,
            name: Some(self.name.clone()),
            action: self.action.clone(),
            payload: self.payload.clone(),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("evt", MessageKind::Event)]
    #[case("event", MessageKind::Event)]
    #[case("res", MessageKind::Response)]
    #[case("err", MessageKind::Error)]
    #[case("command", MessageKind::Command)]
    fn kind_tokens_parse(#[case] token: &str, #[case] expected: MessageKind) {
        assert_eq!(MessageKind::from_token(token), Some(expected));
    }

    #[test]
    fn unknown_kind_token_is_rejected() { assert_eq!(MessageKind::from_token("ping"), None); }

    #[test]
    fn device_ids_compare_by_value() {
        let a = DeviceId::from("sr");
        let b = DeviceId::from(String::from("sr"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "sr");
    }

    #[test]
    fn command_projects_to_message() {
        let cmd = Command::new("door")
            .with_action("open")
            .with_value(json!({"t": 2}));
        let msg = cmd.to_message(&DeviceId::from("gt"));
        assert_eq!(msg.kind, MessageKind::Command);
        assert_eq!(msg.name.as_deref(), Some("door"));
        assert_eq!(msg.action.as_deref(), Some("open"));
        assert_eq!(msg.payload.as_json(), Some(&json!({"t": 2})));
    }
}
