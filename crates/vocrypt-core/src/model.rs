use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId};
use crate::mood::Mood;

/// A logical conversation. `connected_device_count` is derived from the
/// connection hub whenever a session is read and is never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub mood: Mood,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub connected_device_count: usize,
}

impl Session {
    pub fn new(mood: Mood) -> Self {
        Self {
            id: SessionId::new(),
            mood,
            created_at: Utc::now(),
            is_active: true,
            connected_device_count: 0,
        }
    }

    pub fn with_device_count(mut self, count: usize) -> Self {
        self.connected_device_count = count;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Ai,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "ai" => Ok(Self::Ai),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// An ordered text message. `sequence_number` is assigned exactly once by
/// the sequence allocator and is unique within its session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub mood: Mood,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_active_and_empty() {
        let session = Session::new(Mood::Calm);
        assert!(session.is_active);
        assert_eq!(session.connected_device_count, 0);
        assert_eq!(session.mood, Mood::Calm);
    }

    #[test]
    fn session_wire_shape_is_camel_case() {
        let session = Session::new(Mood::Happy).with_device_count(2);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["mood"], "happy");
        assert_eq!(json["isActive"], true);
        assert_eq!(json["connectedDeviceCount"], 2);
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn message_serializes_type_field() {
        let message = Message {
            id: MessageId::new(),
            session_id: SessionId::from_raw("sess_1"),
            message_type: MessageType::Ai,
            content: "hi".into(),
            sequence_number: 7,
            timestamp: Utc::now(),
            mood: Mood::Wise,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "ai");
        assert_eq!(json["sequenceNumber"], 7);
        assert_eq!(json["sessionId"], "sess_1");
    }

    #[test]
    fn message_type_parses() {
        assert_eq!("user".parse::<MessageType>().unwrap(), MessageType::User);
        assert_eq!("system".parse::<MessageType>().unwrap(), MessageType::System);
        assert!("bot".parse::<MessageType>().is_err());
    }
}
