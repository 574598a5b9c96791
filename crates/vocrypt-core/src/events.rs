//! Real-time channel frames. Every frame is `{"event": <name>, "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, SessionId};
use crate::model::Message;

/// Frames a device sends to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum InboundEvent {
    JoinSession {
        #[serde(alias = "session_id")]
        session_id: SessionId,
    },
    LeaveSession {
        #[serde(alias = "session_id")]
        session_id: SessionId,
    },
    SendAudioSignal {
        #[serde(alias = "session_id")]
        session_id: SessionId,
        payload: String,
    },
}

/// Frames the server pushes to a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum OutboundEvent {
    NewMessage {
        session_id: SessionId,
        message: Message,
    },
    AudioSignal {
        session_id: SessionId,
        sender_connection_id: ConnectionId,
        payload: String,
    },
    Status {
        session_id: SessionId,
        connected_device_count: usize,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OutboundEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::NewMessage { session_id, .. }
            | Self::AudioSignal { session_id, .. }
            | Self::Status { session_id, .. } => Some(session_id),
            Self::Error { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::AudioSignal { .. } => "audio_signal",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
        }
    }
}
