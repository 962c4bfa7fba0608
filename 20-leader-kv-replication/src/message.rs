//! Request/response envelope exchanged between clients and replicas.
//!
//! On the wire every message is one flat JSON object:
//!
//! ```text
//! {"type": "PUT", "key": "x", "value": "1"}
//! {"type": "PUT_OK", "timestamp": 1718000000123}
//! ```
//!
//! [`WireMessage`] mirrors that layout with every field optional. Converting it
//! into a [`Message`] checks the fields each kind requires, so the rest of the
//! crate only ever handles well-formed messages and can match exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Milliseconds since the Unix epoch, assigned by the leader.
pub type Timestamp = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Get,
    GetOk,
    Put,
    PutOk,
    Replication,
    ReplicationOk,
    TryOtherServerOrLater,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Get => "GET",
            MessageKind::GetOk => "GET_OK",
            MessageKind::Put => "PUT",
            MessageKind::PutOk => "PUT_OK",
            MessageKind::Replication => "REPLICATION",
            MessageKind::ReplicationOk => "REPLICATION_OK",
            MessageKind::TryOtherServerOrLater => "TRY_OTHER_SERVER_OR_LATER",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Read `key`; `timestamp` is the client's watermark, `None` when it has seen nothing.
    Get {
        key: String,
        timestamp: Option<Timestamp>,
    },
    /// Read result. Both fields are `None` when the key has never been written.
    GetOk {
        value: Option<String>,
        timestamp: Option<Timestamp>,
    },
    Put {
        key: String,
        value: String,
    },
    PutOk {
        timestamp: Timestamp,
    },
    Replication {
        key: String,
        value: String,
        timestamp: Timestamp,
    },
    ReplicationOk,
    TryOtherServerOrLater,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Get { .. } => MessageKind::Get,
            Message::GetOk { .. } => MessageKind::GetOk,
            Message::Put { .. } => MessageKind::Put,
            Message::PutOk { .. } => MessageKind::PutOk,
            Message::Replication { .. } => MessageKind::Replication,
            Message::ReplicationOk => MessageKind::ReplicationOk,
            Message::TryOtherServerOrLater => MessageKind::TryOtherServerOrLater,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(&WireMessage::from(self))?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let wire: WireMessage = serde_json::from_slice(bytes)?;
        Message::try_from(wire)
    }
}

/// Flat JSON layout used on the wire. Missing and `null` fields both decode to `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl WireMessage {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            key: None,
            value: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{kind} message without {field}")]
    MissingField {
        kind: MessageKind,
        field: &'static str,
    },
    #[error("{kind} message with empty {field}")]
    EmptyField {
        kind: MessageKind,
        field: &'static str,
    },
    #[error("unexpected {got} message, expected {expected}")]
    UnexpectedKind {
        expected: &'static str,
        got: MessageKind,
    },
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let mut wire = WireMessage::bare(message.kind());
        match message {
            Message::Get { key, timestamp } => {
                wire.key = Some(key.clone());
                wire.timestamp = *timestamp;
            }
            Message::GetOk { value, timestamp } => {
                wire.value = value.clone();
                wire.timestamp = *timestamp;
            }
            Message::Put { key, value } => {
                wire.key = Some(key.clone());
                wire.value = Some(value.clone());
            }
            Message::PutOk { timestamp } => {
                wire.timestamp = Some(*timestamp);
            }
            Message::Replication {
                key,
                value,
                timestamp,
            } => {
                wire.key = Some(key.clone());
                wire.value = Some(value.clone());
                wire.timestamp = Some(*timestamp);
            }
            Message::ReplicationOk | Message::TryOtherServerOrLater => {}
        }
        wire
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = wire.kind;
        let message = match kind {
            MessageKind::Get => Message::Get {
                key: non_empty(kind, "key", wire.key)?,
                timestamp: wire.timestamp,
            },
            MessageKind::GetOk => Message::GetOk {
                value: wire.value,
                timestamp: wire.timestamp,
            },
            MessageKind::Put => Message::Put {
                key: non_empty(kind, "key", wire.key)?,
                value: non_empty(kind, "value", wire.value)?,
            },
            MessageKind::PutOk => Message::PutOk {
                timestamp: required(kind, "timestamp", wire.timestamp)?,
            },
            MessageKind::Replication => Message::Replication {
                key: non_empty(kind, "key", wire.key)?,
                value: non_empty(kind, "value", wire.value)?,
                timestamp: required(kind, "timestamp", wire.timestamp)?,
            },
            MessageKind::ReplicationOk => Message::ReplicationOk,
            MessageKind::TryOtherServerOrLater => Message::TryOtherServerOrLater,
        };
        Ok(message)
    }
}

fn required<T>(kind: MessageKind, field: &'static str, value: Option<T>) -> Result<T, ProtocolError> {
    value.ok_or(ProtocolError::MissingField { kind, field })
}

fn non_empty(
    kind: MessageKind,
    field: &'static str,
    value: Option<String>,
) -> Result<String, ProtocolError> {
    let value = required(kind, field, value)?;
    if value.is_empty() {
        return Err(ProtocolError::EmptyField { kind, field });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_upper_snake_case_on_the_wire() {
        let bytes = Message::TryOtherServerOrLater.encode().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"type":"TRY_OTHER_SERVER_OR_LATER"}"#
        );

        let bytes = Message::PutOk { timestamp: 7 }.encode().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"type":"PUT_OK","timestamp":7}"#
        );
    }

    #[test]
    fn absent_timestamp_is_not_zero() {
        let absent = Message::decode(br#"{"type":"GET","key":"x"}"#).unwrap();
        assert_eq!(
            absent,
            Message::Get {
                key: "x".into(),
                timestamp: None
            }
        );

        let zero = Message::decode(br#"{"type":"GET","key":"x","timestamp":0}"#).unwrap();
        assert_eq!(
            zero,
            Message::Get {
                key: "x".into(),
                timestamp: Some(0)
            }
        );
    }

    #[test]
    fn null_fields_decode_as_absent() {
        let message = Message::decode(
            br#"{"type":"GET_OK","key":null,"value":null,"timestamp":null}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            Message::GetOk {
                value: None,
                timestamp: None
            }
        );
    }

    #[test]
    fn put_without_value_is_rejected() {
        let err = Message::decode(br#"{"type":"PUT","key":"x"}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField {
                kind: MessageKind::Put,
                field: "value"
            }
        ));

        let err = Message::decode(br#"{"type":"PUT","key":"","value":"1"}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::EmptyField {
                kind: MessageKind::Put,
                field: "key"
            }
        ));
    }

    #[test]
    fn replication_requires_timestamp() {
        let err = Message::decode(br#"{"type":"REPLICATION","key":"x","value":"1"}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField {
                kind: MessageKind::Replication,
                field: "timestamp"
            }
        ));
    }

    #[test]
    fn unknown_kind_and_garbage_are_malformed() {
        assert!(matches!(
            Message::decode(br#"{"type":"DELETE","key":"x"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Message::decode(b"not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn replication_keeps_every_field() {
        let message = Message::Replication {
            key: "k".into(),
            value: "v".into(),
            timestamp: 42,
        };
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }
}
