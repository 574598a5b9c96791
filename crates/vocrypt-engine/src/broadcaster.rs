use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use vocrypt_core::{
    Message, MessageId, MessageType, OutboundEvent, Responder, ResponderError, Session, SessionId,
};
use vocrypt_store::ChatStore;
use vocrypt_telemetry::MetricsRecorder;

use crate::error::RelayError;
use crate::hub::{ConnectionHub, Overflow};
use crate::registry::SessionRegistry;
use crate::sequence::SequenceAllocator;

/// Orders, delivers and persists text messages, and dispatches AI replies
/// to user messages.
#[derive(Clone)]
pub struct MessageBroadcaster {
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    sequences: Arc<SequenceAllocator>,
    store: Arc<dyn ChatStore>,
    responder: Option<Arc<dyn Responder>>,
    metrics: Arc<MetricsRecorder>,
    /// Cancellation handles of in-flight replies, keyed by the prompting message.
    replies: Arc<DashMap<MessageId, CancellationToken>>,
    reply_timeout: Duration,
}

impl MessageBroadcaster {
    pub fn new(
        registry: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        sequences: Arc<SequenceAllocator>,
        store: Arc<dyn ChatStore>,
        responder: Option<Arc<dyn Responder>>,
        metrics: Arc<MetricsRecorder>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            hub,
            sequences,
            store,
            responder,
            metrics,
            replies: Arc::new(DashMap::new()),
            reply_timeout,
        }
    }

    /// Submit a message to an active session. User messages also trigger an
    /// AI reply that is published later; this call does not wait for it.
    #[instrument(skip_all, fields(session_id = %session_id, message_type = %message_type))]
    pub async fn submit(
        &self,
        session_id: &SessionId,
        message_type: MessageType,
        content: String,
    ) -> Result<Message, RelayError> {
        let session = self.registry.get(session_id).await?;
        let message = self.publish(&session, message_type, content).await?;
        if message_type == MessageType::User {
            self.dispatch_reply(&session, &message);
        }
        Ok(message)
    }

    /// Allocate, deliver, then persist one message.
    async fn publish(
        &self,
        session: &Session,
        message_type: MessageType,
        content: String,
    ) -> Result<Message, RelayError> {
        if !self.registry.is_active(&session.id) {
            return Err(RelayError::SessionNotFound(session.id.clone()));
        }

        let delivery = self
            .hub
            .fan_out(&session.id, None, Overflow::Evict, || {
                let message = Message {
                    id: MessageId::new(),
                    session_id: session.id.clone(),
                    message_type,
                    content,
                    sequence_number: self.sequences.next(&session.id),
                    timestamp: Utc::now(),
                    mood: session.mood,
                };
                let event = OutboundEvent::NewMessage {
                    session_id: session.id.clone(),
                    message: message.clone(),
                };
                (message, event)
            })?;
        let message = delivery.value;

        self.metrics.counter_inc(
            "messages.submitted",
            &[("type", message_type.as_str())],
            1,
        );
        debug!(
            seq = message.sequence_number,
            delivered = delivery.delivered,
            "message delivered"
        );

        // Runs to completion even if this caller is dropped.
        let store = Arc::clone(&self.store);
        let record = message.clone();
        let persisted = tokio::spawn(async move { store.append_message(&record).await }).await;
        let failure = match persisted {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(error) = failure {
            self.metrics.counter_inc("messages.unpersisted", &[], 1);
            warn!(
                session_id = %message.session_id,
                seq = message.sequence_number,
                error = %error,
                "message delivered but not persisted"
            );
        }

        Ok(message)
    }

    fn dispatch_reply(&self, session: &Session, prompt: &Message) {
        let Some(responder) = self.responder.clone() else {
            return;
        };

        let cancel = CancellationToken::new();
        let reply_key = prompt.id.clone();
        self.replies.insert(reply_key.clone(), cancel.clone());

        let this = self.clone();
        let session = session.clone();
        let prompt = prompt.content.clone();
        tokio::spawn(async move {
            this.metrics.counter_inc("responder.requests", &[], 1);
            let started = Instant::now();

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(ResponderError::Cancelled),
                result = tokio::time::timeout(
                    this.reply_timeout,
                    responder.respond(session.mood, &prompt),
                ) => result.unwrap_or(Err(ResponderError::Timeout(this.reply_timeout))),
            };

            this.metrics.histogram_observe(
                "responder.duration_ms",
                &[],
                started.elapsed().as_millis() as f64,
            );
            this.replies.remove(&reply_key);

            let text = match outcome {
                Ok(text) => text,
                Err(e) => {
                    this.metrics
                        .counter_inc("responder.failures", &[("kind", e.error_kind())], 1);
                    warn!(
                        session_id = %session.id,
                        responder = responder.name(),
                        kind = e.error_kind(),
                        error = %e,
                        "AI reply suppressed"
                    );
                    return;
                }
            };

            match this.publish(&session, MessageType::Ai, text).await {
                Ok(reply) => debug!(
                    session_id = %session.id,
                    seq = reply.sequence_number,
                    "AI reply published"
                ),
                Err(RelayError::SessionNotFound(_)) => {
                    debug!(session_id = %session.id, "session closed before AI reply, discarded");
                }
                Err(e) => warn!(session_id = %session.id, error = %e, "AI reply not published"),
            }
        });
    }

    /// Cancel every in-flight reply.
    pub fn abort_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.replies.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}
