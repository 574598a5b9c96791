//! JSON text framing for the real-time channel.

use tracing::error;

use vocrypt_core::{InboundEvent, OutboundEvent};

/// Serialize an outbound event. Serialization failures are logged and the
/// frame is skipped.
pub fn encode(event: &OutboundEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(event = event.name(), error = %e, "failed to encode outbound event");
            None
        }
    }
}

pub fn decode(text: &str) -> Result<InboundEvent, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vocrypt_core::{ConnectionId, SessionId};

    #[test]
    fn encodes_audio_signal_frame() {
        let event = OutboundEvent::AudioSignal {
            session_id: SessionId::from_raw("sess_1"),
            sender_connection_id: ConnectionId::from_raw("conn_1"),
            payload: "AAEC".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(value["event"], "audio_signal");
        assert_eq!(value["data"]["sessionId"], "sess_1");
        assert_eq!(value["data"]["senderConnectionId"], "conn_1");
        assert_eq!(value["data"]["payload"], "AAEC");
    }

    #[test]
    fn decodes_leave_session() {
        let event = decode(r#"{"event":"leave_session","data":{"sessionId":"sess_9"}}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::LeaveSession {
                session_id: SessionId::from_raw("sess_9")
            }
        );
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(decode(r#"{"event":"dance","data":{}}"#).is_err());
        assert!(decode("not json").is_err());
    }
}
