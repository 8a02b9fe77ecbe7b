//! Structured JSON wire format.
//!
//! Each frame is one JSON object:
//!
//! ```text
//! {"dev":"sr","tp":"evt","evt":"bc","val":{"c":"101112131415"}}
//! {"dev":"gt","tp":"cmd","cmd":"door","act":"open"}
//! ```
//!
//! `dev` (or `device`) names the sender and `tp` (or `type`) selects the
//! message kind. The name field depends on the kind: `evt` for events, `res`
//! for responses, `err` for errors and `cmd` for commands. `act` carries an
//! optional action and `val` the payload. Any other fields are kept in
//! [`Message::extra`]:
//!
//! ```text
//! {"dev":"hs_ab","tp":"res","cmd":"fan","res":"ok","ts":1717171717}
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use super::{DecodeError, EncodeError, MessageCodec};
use crate::{
    frame::DELIMITER,
    message::{Command, DeviceId, Message, MessageKind, Payload},
};

const DEVICE_FIELDS: &[&str] = &["dev", "device"];
const KIND_FIELDS: &[&str] = &["tp", "type"];
const ACTION_FIELD: &str = "act";
const VALUE_FIELD: &str = "val";

fn name_fields(kind: MessageKind) -> &'static [&'static str] {
    match kind {
        MessageKind::Event => &["evt", "name"],
        MessageKind::Response => &["res"],
        MessageKind::Error => &["err", "code"],
        MessageKind::Command => &["cmd"],
    }
}

/// Codec for line-delimited JSON objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Construct the codec.
    #[must_use]
    pub const fn new() -> Self { Self }
}

/// Remove the first present field among `names`, requiring a string value.
fn take_string(
    fields: &mut Map<String, Value>,
    names: &[&str],
) -> Result<Option<String>, DecodeError> {
    for name in names {
        match fields.remove(*name) {
            Some(Value::String(s)) => return Ok(Some(s)),
            Some(other) => {
                return Err(DecodeError::MalformedPayload(format!(
                    "field `{name}` must be a string, got {other}"
                )));
            }
            None => {}
        }
    }
    Ok(None)
}

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str { "json" }

    fn parse(&self, frame: &[u8]) -> Result<Message, DecodeError> {
        let text =
            std::str::from_utf8(frame).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(DecodeError::InvalidEncoding(
                "expected a JSON object".to_owned(),
            ));
        };

        let device = take_string(&mut fields, DEVICE_FIELDS)
            .map_err(|_| DecodeError::MissingDeviceId)?
            .filter(|id| !id.is_empty())
            .ok_or(DecodeError::MissingDeviceId)?;
        let kind_token = take_string(&mut fields, KIND_FIELDS)?.ok_or(DecodeError::MissingKind)?;
        let kind = MessageKind::from_token(&kind_token)
            .ok_or_else(|| DecodeError::UnknownKind(kind_token.clone()))?;
        let name = take_string(&mut fields, name_fields(kind))?;
        let action = take_string(&mut fields, &[ACTION_FIELD])?;
        let payload = fields.remove(VALUE_FIELD).unwrap_or(Value::Null);

        Ok(Message {
            device: DeviceId::from(device),
            kind,
            name,
            action,
            payload: Payload::Json(payload),
            extra: fields,
        })
    }

    fn serialize(&self, device: &DeviceId, command: &Command) -> Result<Bytes, EncodeError> {
        let mut fields = Map::new();
        fields.insert("dev".to_owned(), Value::from(device.as_str()));
        fields.insert("tp".to_owned(), Value::from(MessageKind::Command.token()));
        fields.insert("cmd".to_owned(), Value::from(command.name.as_str()));
        if let Some(action) = &command.action {
            fields.insert(ACTION_FIELD.to_owned(), Value::from(action.as_str()));
        }
        match &command.payload {
            Payload::Json(Value::Null) => {}
            Payload::Json(value) => {
                fields.insert(VALUE_FIELD.to_owned(), value.clone());
            }
            Payload::Text(_) => {
                return Err(EncodeError::UnsupportedPayload {
                    format: self.name(),
                });
            }
        }

        let encoded = serde_json::to_vec(&Value::Object(fields))?;
        let mut frame = BytesMut::with_capacity(encoded.len() + 1);
        frame.extend_from_slice(&encoded);
        frame.put_u8(DELIMITER);
        Ok(frame.freeze())
    }
}
