//! Decoders for compact telemetry payloads.
//!
//! Multi-zone frames carry no zone labels: values are assigned to zones
//! `A`, `B`, `C`, ... in the order they appear.

use super::super::DecodeError;
use crate::message::{Command, Message};

/// Name assigned to temperature frames (`tp`).
pub const TEMPERATURE: &str = "temperature";
/// Name assigned to warning flag frames (`w`).
pub const WARNING: &str = "warning";
/// Name assigned to fan status frames (`AC2`).
pub const FAN: &str = "fan";

const FIELD_SEPARATOR: char = ';';
const MAX_ZONES: usize = 26;

/// One value reported for a storage zone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoneReading {
    /// Zone label, `A` for the first value.
    pub zone: char,
    /// Reported value.
    pub value: f64,
}

/// Alarm state of one zone (`wA1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WarningFlag {
    /// Zone label.
    pub zone: char,
    /// Whether the warning is raised.
    pub active: bool,
}

/// Operating mode reported in a fan status frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FanMode {
    /// `C`.
    Cooling,
    /// `H`.
    Heating,
    /// Any other mode letter.
    Off,
}

/// Fan state of one zone (`AC2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanStatus {
    /// Zone label.
    pub zone: char,
    /// Operating mode.
    pub mode: FanMode,
    /// Fan speed, 0 to 3.
    pub speed: u8,
}

/// Label of the zone at `index` in reading order.
#[must_use]
pub fn zone_label(index: usize) -> Option<char> {
    u8::try_from(index)
        .ok()
        .filter(|i| usize::from(*i) < MAX_ZONES)
        .map(|i| char::from(b'A' + i))
}

/// Decode semicolon-separated readings in fixed zone order.
///
/// ```
/// use hubwire::codec::compact::telemetry::zone_readings;
///
/// let readings = zone_readings("-18.5;4.2;21.3").unwrap();
/// assert_eq!(readings[0].zone, 'A');
/// assert_eq!(readings[2].value, 21.3);
/// ```
///
/// # Errors
///
/// Returns [`DecodeError::MalformedPayload`] when the text is empty, a field
/// is not a number, or there are more values than zone labels.
pub fn zone_readings(text: &str) -> Result<Vec<ZoneReading>, DecodeError> {
    if text.trim().is_empty() {
        return Err(DecodeError::MalformedPayload("no zone readings".to_owned()));
    }
    text.split(FIELD_SEPARATOR)
        .enumerate()
        .map(|(index, field)| {
            let zone = zone_label(index).ok_or_else(|| {
                DecodeError::MalformedPayload(format!("more than {MAX_ZONES} zone readings"))
            })?;
            let value = field.trim().parse::<f64>().map_err(|_| {
                DecodeError::MalformedPayload(format!("zone {zone}: {field:?} is not a number"))
            })?;
            Ok(ZoneReading { zone, value })
        })
        .collect()
}

/// Decode the readings carried by a temperature message.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedPayload`] if the message has no text
/// payload or the payload is not a reading list.
pub fn message_readings(message: &Message) -> Result<Vec<ZoneReading>, DecodeError> {
    let text = message
        .payload
        .as_text()
        .ok_or_else(|| DecodeError::MalformedPayload("expected a text payload".to_owned()))?;
    zone_readings(text)
}

/// Decode a warning flag payload such as `A1`.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedPayload`] unless the text is one zone
/// letter followed by `0` or `1`.
pub fn warning_flag(text: &str) -> Result<WarningFlag, DecodeError> {
    match text.as_bytes() {
        [zone, flag @ (b'0' | b'1')] if zone.is_ascii_uppercase() => Ok(WarningFlag {
            zone: char::from(*zone),
            active: *flag == b'1',
        }),
        _ => Err(DecodeError::MalformedPayload(format!(
            "invalid warning flag: {text:?}"
        ))),
    }
}

/// Decode a fan status payload such as `AC2`.
///
/// ```
/// use hubwire::codec::compact::telemetry::{FanMode, fan_status};
///
/// let status = fan_status("BH1").unwrap();
/// assert_eq!(status.zone, 'B');
/// assert_eq!(status.mode, FanMode::Heating);
/// assert_eq!(status.speed, 1);
/// ```
///
/// # Errors
///
/// Returns [`DecodeError::MalformedPayload`] unless the text is a zone
/// letter, a mode letter and a speed from `0` to `3`.
pub fn fan_status(text: &str) -> Result<FanStatus, DecodeError> {
    match text.as_bytes() {
        [zone, mode, speed @ b'0'..=b'3'] if zone.is_ascii_uppercase() && mode.is_ascii_alphabetic() => {
            let mode = match mode {
                b'C' => FanMode::Cooling,
                b'H' => FanMode::Heating,
                _ => FanMode::Off,
            };
            Ok(FanStatus {
                zone: char::from(*zone),
                mode,
                speed: speed - b'0',
            })
        }
        _ => Err(DecodeError::MalformedPayload(format!(
            "invalid fan status: {text:?}"
        ))),
    }
}

/// Build a set-point command (`p`) for `zone`.
///
/// Controllers accept whole degrees only; the fractional part is dropped.
///
/// ```
/// use hubwire::codec::compact::telemetry::set_point;
///
/// let cmd = set_point('A', -20.7);
/// assert_eq!(cmd.payload.as_text(), Some("A-20"));
/// ```
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "set points are whole degrees well inside i64"
)]
pub fn set_point(zone: char, value: f64) -> Command {
    let degrees = value.trunc() as i64;
    Command::new("p").with_text(format!("{zone}{degrees}"))
}
