//! Wire-message codec for the MySensors serial protocol.
//!
//! One frame is a semicolon-separated list of values terminated by a newline:
//!
//! ```text
//! node-id ; child-sensor-id ; command ; ack ; type ; payload \n
//! ```
//!
//! The maximum payload size is 25 bytes: the nRF24L01+ radio carries 32 bytes
//! per packet and the MySensors 2.x library uses 7 of them for the header.
//!
//! The ack field has a direction-dependent meaning: on an incoming message
//! `1` marks an acknowledgment (not an actionable message), on an outgoing
//! message `1` asks the destination node to acknowledge.

use crate::consts::{self, Command};
use thiserror::Error;

/// Maximum payload size on output; longer payloads are truncated, never rejected.
pub const MAX_PAYLOAD: usize = 25;

/// Sensor id denoting the node itself rather than one of its children.
pub const NODE_SENSOR_ID: u8 = 255;

/// Provenance of a message: received from a device, or built by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Frame validation failure. Every field violation is collected so a caller
/// can log one line listing every problem; no message is returned on any
/// violation.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid message: expected at least 5 fields, got {0}")]
    TooFewFields(usize),
    #[error("invalid message: {}", .0.join(", "))]
    InvalidFields(Vec<String>),
}

/// The canonical unit exchanged with a device, whatever the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub node_id: u8,
    pub sensor_id: u8,
    pub command: Command,
    pub ack: bool,
    /// Numeric type field; its table depends on `command`.
    pub typ: u8,
    /// Symbolic name of `typ` in the table implied by `command`, for
    /// diagnostics and controller payloads.
    pub typ_label: Option<&'static str>,
    pub payload: String,
    pub direction: Direction,
}

impl Message {
    /// Parse one frame (trailing newline already or not yet stripped). Fields
    /// are split on `;`, tolerating surrounding whitespace. At least five
    /// fields are required; the sixth, the payload, defaults to empty.
    pub fn parse(raw: &str) -> Result<Message, ParseError> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = raw.split(';').map(str::trim).collect();
        if fields.len() < 5 {
            return Err(ParseError::TooFewFields(fields.len()));
        }

        let mut errs: Vec<String> = Vec::new();
        let node_id = parse_id("node_id", fields[0], &mut errs);
        let sensor_id = parse_id("sensor_id", fields[1], &mut errs);
        let command = match fields[2].parse::<u8>().ok().and_then(Command::from_code) {
            Some(c) => Some(c),
            None => {
                errs.push(format!("command='{}': invalid value", fields[2]));
                None
            }
        };
        let ack = match fields[3] {
            "0" => Some(false),
            "1" => Some(true),
            other => {
                errs.push(format!("ack='{}': invalid value", other));
                None
            }
        };
        let typ = match fields[4].parse::<u8>() {
            Ok(t) => Some(t),
            Err(_) => {
                errs.push(format!("type='{}': invalid value", fields[4]));
                None
            }
        };
        // The type is validated against the table implied by the command;
        // STREAM has no table and accepts any code.
        let mut typ_label = None;
        if let (Some(cmd), Some(t)) = (command, typ) {
            if consts::has_type_table(cmd) {
                match consts::type_label(cmd, t) {
                    Some(label) => typ_label = Some(label),
                    None => errs.push(format!("type='{}': invalid value", fields[4])),
                }
            }
        }

        if !errs.is_empty() {
            return Err(ParseError::InvalidFields(errs));
        }

        Ok(Message {
            node_id: node_id.unwrap_or(0),
            sensor_id: sensor_id.unwrap_or(0),
            command: command.unwrap_or(Command::Internal),
            ack: ack.unwrap_or(false),
            typ: typ.unwrap_or(0),
            typ_label,
            payload: fields.get(5).map(|s| s.to_string()).unwrap_or_default(),
            direction: Direction::Incoming,
        })
    }

    /// Serialize to the wire form, without the newline terminator (newline
    /// termination is a transport concern).
    pub fn serialize(&self) -> String {
        format!(
            "{};{};{};{};{};{}",
            self.node_id,
            self.sensor_id,
            self.command.code(),
            u8::from(self.ack),
            self.typ,
            self.payload
        )
    }

    /// True iff this is a received acknowledgment, which the dispatcher must
    /// not act on.
    pub fn is_incoming_ack(&self) -> bool {
        self.direction == Direction::Incoming && self.ack
    }

    /// Copy with `typ` replaced and its label recomputed from the table
    /// implied by the command.
    pub fn with_type(&self, typ: u8) -> Message {
        Message {
            typ,
            typ_label: consts::type_label(self.command, typ),
            ..self.clone()
        }
    }

    /// Copy with the payload set to the string form of `data`, truncated to
    /// [`MAX_PAYLOAD`] bytes.
    pub fn with_payload(&self, data: impl ToString) -> Message {
        let mut payload = data.to_string();
        if payload.len() > MAX_PAYLOAD {
            let mut cut = MAX_PAYLOAD;
            while !payload.is_char_boundary(cut) {
                cut -= 1;
            }
            payload.truncate(cut);
        }
        Message {
            payload,
            ..self.clone()
        }
    }
}

fn parse_id(name: &str, field: &str, errs: &mut Vec<String>) -> Option<u8> {
    match field.parse::<u8>() {
        Ok(v) => Some(v),
        Err(_) => {
            errs.push(format!("{}='{}': invalid value", name, field));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::parse("12;255;0;0;17;2.4.0\n").expect("valid frame")
    }

    #[test]
    fn parse_node_presentation() {
        let msg = sample();
        assert_eq!(msg.node_id, 12);
        assert_eq!(msg.sensor_id, 255);
        assert_eq!(msg.command, Command::Presentation);
        assert!(!msg.ack);
        assert_eq!(msg.typ, 17);
        assert_eq!(msg.typ_label, Some("S_ARDUINO_NODE"));
        assert_eq!(msg.payload, "2.4.0");
        assert_eq!(msg.direction, Direction::Incoming);
    }

    #[test]
    fn parse_tolerates_whitespace_and_missing_payload() {
        let msg = Message::parse(" 7 ; 255 ; 3 ; 0 ; 3 ").expect("valid frame");
        assert_eq!(msg.node_id, 7);
        assert_eq!(msg.typ_label, Some("I_ID_REQUEST"));
        assert_eq!(msg.payload, "");
    }

    #[test]
    fn round_trip() {
        let msg = sample();
        assert_eq!(Message::parse(&msg.serialize()).unwrap(), msg);
    }

    #[test]
    fn rejects_too_few_fields() {
        assert!(matches!(
            Message::parse("12;255;0;0"),
            Err(ParseError::TooFewFields(4))
        ));
    }

    #[test]
    fn rejects_bad_fields_and_reports_each() {
        let err = Message::parse("abc;999;7;2;200;x").unwrap_err();
        match err {
            ParseError::InvalidFields(errs) => {
                // node_id non-numeric, sensor_id > 255, unknown command,
                // bad ack; the type cannot be table-checked without a command.
                assert_eq!(errs.len(), 4, "errs={:?}", errs);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_type_outside_table() {
        // 40 is outside the presentation device-kind table.
        assert!(Message::parse("1;2;0;0;40;").is_err());
        // ...but fine as a set/req variable.
        assert!(Message::parse("1;2;1;0;40;").is_ok());
    }

    #[test]
    fn stream_type_unchecked() {
        let msg = Message::parse("1;2;4;0;200;blob").expect("stream frame");
        assert_eq!(msg.typ, 200);
        assert_eq!(msg.typ_label, None);
    }

    #[test]
    fn incoming_ack_detection() {
        let msg = Message::parse("1;2;1;1;0;21.5").unwrap();
        assert!(msg.is_incoming_ack());
        let out = Message {
            direction: Direction::Outgoing,
            ..msg
        };
        assert!(!out.is_incoming_ack());
    }

    #[test]
    fn with_type_recomputes_label() {
        let msg = Message::parse("7;255;3;0;3;").unwrap();
        let resp = msg.with_type(crate::consts::I_ID_RESPONSE);
        assert_eq!(resp.typ, 4);
        assert_eq!(resp.typ_label, Some("I_ID_RESPONSE"));
    }

    #[test]
    fn payload_truncated_to_25_bytes() {
        let msg = sample().with_payload("x".repeat(40));
        assert_eq!(msg.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn serialize_has_no_trailing_newline() {
        assert_eq!(sample().serialize(), "12;255;0;0;17;2.4.0");
    }
}
