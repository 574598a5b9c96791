use std::sync::Arc;

use tracing::trace;

use vocrypt_core::{ConnectionId, OutboundEvent, SessionId};
use vocrypt_telemetry::MetricsRecorder;

use crate::error::RelayError;
use crate::hub::{ConnectionHub, Overflow};
use crate::registry::SessionRegistry;

pub const DEFAULT_MAX_AUDIO_PAYLOAD_BYTES: usize = 64 * 1024;

/// Forwards audio-signal frames to the other members of a session.
/// Frames are neither numbered nor stored, and a full queue drops the frame
/// for that receiver only.
pub struct AudioSignalRelay {
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    max_payload_bytes: usize,
    metrics: Arc<MetricsRecorder>,
}

impl AudioSignalRelay {
    pub fn new(
        registry: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        max_payload_bytes: usize,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            registry,
            hub,
            max_payload_bytes,
            metrics,
        }
    }

    pub fn relay(
        &self,
        session_id: &SessionId,
        sender: &ConnectionId,
        payload: String,
    ) -> Result<(), RelayError> {
        if !self.registry.is_active(session_id) {
            return Err(RelayError::SessionNotFound(session_id.clone()));
        }
        if payload.len() > self.max_payload_bytes {
            return Err(RelayError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }

        let delivery = self
            .hub
            .fan_out(session_id, Some(sender), Overflow::DropNewest, || {
                (
                    (),
                    OutboundEvent::AudioSignal {
                        session_id: session_id.clone(),
                        sender_connection_id: sender.clone(),
                        payload,
                    },
                )
            })?;

        if delivery.delivered > 0 {
            self.metrics
                .counter_inc("audio.frames.relayed", &[], delivery.delivered as u64);
        }
        if delivery.dropped > 0 {
            self.metrics
                .counter_inc("audio.frames.dropped", &[], delivery.dropped as u64);
        }
        trace!(
            session_id = %session_id,
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "audio frame relayed"
        );
        Ok(())
    }
}
