//! JSON wire protocol for the collaboration transport.
//!
//! Frame shape: `{"event": "<name>", "data": {...}}` — one tagged enum per
//! direction. Change payloads carry open property maps, so the wire format
//! is self-describing JSON text rather than a binary codec.

use charta_engine::codec::ChangeEvent;
use serde::{Deserialize, Serialize};

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Authenticate {
        user_id: String,
        username: String,
    },
    JoinDiagram {
        diagram_id: String,
    },
    LeaveDiagram {
        diagram_id: String,
    },
    DiagramChange {
        diagram_id: String,
        changes: Vec<ChangeEvent>,
        version: u64,
    },
    CursorMove {
        diagram_id: String,
        x: f64,
        y: f64,
    },
}

/// A participant as reported to clients: roster entry plus the resolved
/// user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub joined_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<(f64, f64)>,
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Authenticated {
        user_id: String,
        username: String,
    },
    AuthError {
        message: String,
    },
    UserJoined {
        user_id: String,
        username: String,
        timestamp: u64,
    },
    UserLeft {
        user_id: String,
        username: String,
        timestamp: u64,
    },
    ParticipantsUpdated {
        participants: Vec<ParticipantProfile>,
    },
    DiagramUpdated {
        changes: Vec<ChangeEvent>,
        version: u64,
        user_id: String,
        username: String,
        timestamp: u64,
    },
    CursorUpdated {
        user_id: String,
        username: String,
        x: f64,
        y: f64,
        timestamp: u64,
    },
    Error {
        message: String,
    },
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    NotAuthenticated,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::NotAuthenticated => write!(f, "Not authenticated"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charta_engine::codec::ChangeKind;

    #[test]
    fn test_client_message_roundtrip() {
        let msg = ClientMessage::Authenticate {
            user_id: "u1".into(),
            username: "alice".into(),
        };
        let raw = msg.encode().unwrap();
        assert_eq!(ClientMessage::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_event_tags_are_snake_case() {
        let raw = ClientMessage::JoinDiagram { diagram_id: "d1".into() }
            .encode()
            .unwrap();
        assert!(raw.contains("\"event\":\"join_diagram\""));
        assert!(raw.contains("\"diagramId\":\"d1\""));
    }

    #[test]
    fn test_diagram_change_carries_changes() {
        let change = ChangeEvent::remove("s1");
        let msg = ClientMessage::DiagramChange {
            diagram_id: "d1".into(),
            changes: vec![change],
            version: 7,
        };
        let raw = msg.encode().unwrap();
        let back = ClientMessage::decode(&raw).unwrap();
        match back {
            ClientMessage::DiagramChange { changes, version, .. } => {
                assert_eq!(version, 7);
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].kind, ChangeKind::Remove);
            }
            other => panic!("expected DiagramChange, got {other:?}"),
        }
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::DiagramUpdated {
            changes: vec![ChangeEvent::remove("s1")],
            version: 3,
            user_id: "u1".into(),
            username: "alice".into(),
            timestamp: 123,
        };
        let raw = msg.encode().unwrap();
        assert_eq!(ServerMessage::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_participants_updated_profiles() {
        let msg = ServerMessage::ParticipantsUpdated {
            participants: vec![ParticipantProfile {
                user_id: "u1".into(),
                username: "alice".into(),
                email: Some("alice@example.com".into()),
                avatar: None,
                joined_at: 42,
                cursor: Some((10.0, 20.0)),
            }],
        };
        let raw = msg.encode().unwrap();
        let back = ServerMessage::decode(&raw).unwrap();
        assert_eq!(back, msg);
        assert!(raw.contains("\"userId\":\"u1\""));
    }

    #[test]
    fn test_decode_unknown_event_fails() {
        let err = ClientMessage::decode(r#"{"event":"warp_drive","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::DeserializationError(_)));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ServerMessage::decode("not even json").is_err());
    }
}
