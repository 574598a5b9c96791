use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use vocrypt_core::{ConnectionId, Message, MessageType, Responder, Session, SessionId};
use vocrypt_store::{ChatStore, HistoryQuery};
use vocrypt_telemetry::MetricsRecorder;

use crate::audio::{AudioSignalRelay, DEFAULT_MAX_AUDIO_PAYLOAD_BYTES};
use crate::broadcaster::MessageBroadcaster;
use crate::error::RelayError;
use crate::hub::{ConnectionHub, Membership, OutboundReceiver, Outbox, DEFAULT_QUEUE_CAPACITY};
use crate::registry::SessionRegistry;
use crate::sequence::SequenceAllocator;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub max_audio_payload_bytes: usize,
    pub outbound_queue_capacity: usize,
    pub reply_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_audio_payload_bytes: DEFAULT_MAX_AUDIO_PAYLOAD_BYTES,
            outbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reply_timeout: Duration::from_secs(60),
        }
    }
}

/// Entry point for transports: sessions, membership, messages and audio.
pub struct SessionRelay {
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    sequences: Arc<SequenceAllocator>,
    broadcaster: MessageBroadcaster,
    audio: AudioSignalRelay,
    store: Arc<dyn ChatStore>,
    metrics: Arc<MetricsRecorder>,
}

impl SessionRelay {
    pub fn new(
        store: Arc<dyn ChatStore>,
        responder: Option<Arc<dyn Responder>>,
        metrics: Arc<MetricsRecorder>,
        config: RelayConfig,
    ) -> Self {
        let sequences = Arc::new(SequenceAllocator::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&store),
            Arc::clone(&sequences),
        ));
        let hub = Arc::new(ConnectionHub::new(
            Arc::clone(&registry),
            config.outbound_queue_capacity,
            Arc::clone(&metrics),
        ));
        let broadcaster = MessageBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&hub),
            Arc::clone(&sequences),
            Arc::clone(&store),
            responder,
            Arc::clone(&metrics),
            config.reply_timeout,
        );
        let audio = AudioSignalRelay::new(
            Arc::clone(&registry),
            Arc::clone(&hub),
            config.max_audio_payload_bytes,
            Arc::clone(&metrics),
        );

        Self {
            registry,
            hub,
            sequences,
            broadcaster,
            audio,
            store,
            metrics,
        }
    }

    pub async fn create_session(&self, mood: &str) -> Result<Session, RelayError> {
        self.registry.create(mood).await
    }

    /// An active session with its live device count.
    pub async fn session(&self, id: &SessionId) -> Result<Session, RelayError> {
        let session = self.registry.get(id).await?;
        Ok(session.with_device_count(self.hub.count(id)))
    }

    /// Close a session: storage first, then every member is removed. Once
    /// the roster refuses fan-out the session's counter is dropped.
    pub async fn close_session(&self, id: &SessionId) -> Result<Session, RelayError> {
        let session = self.registry.close(id).await?;
        self.hub.close_session(id);
        self.sequences.release(id);
        Ok(session.with_device_count(0))
    }

    /// Stored messages in sequence order. Closed sessions keep their history.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn history(
        &self,
        id: &SessionId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, RelayError> {
        self.registry.find(id).await?;
        Ok(self.store.list_messages(id, query).await?)
    }

    pub fn open_channel(&self) -> (Outbox, OutboundReceiver) {
        self.hub.open_channel()
    }

    /// Join a session, restoring it from storage first if needed.
    pub async fn join(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
        outbox: Outbox,
    ) -> Result<Membership, RelayError> {
        self.registry.get(session_id).await?;
        self.hub.join(session_id, connection_id, outbox)
    }

    pub fn leave(&self, connection_id: &ConnectionId) -> bool {
        self.hub.leave(connection_id)
    }

    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<SessionId> {
        self.hub.session_of(connection_id)
    }

    pub async fn submit(
        &self,
        session_id: &SessionId,
        message_type: MessageType,
        content: String,
    ) -> Result<Message, RelayError> {
        self.broadcaster
            .submit(session_id, message_type, content)
            .await
    }

    pub fn relay_audio(
        &self,
        session_id: &SessionId,
        sender: &ConnectionId,
        payload: String,
    ) -> Result<(), RelayError> {
        self.audio.relay(session_id, sender, payload)
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn broadcaster(&self) -> &MessageBroadcaster {
        &self.broadcaster
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Cancel outstanding AI replies. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.broadcaster.abort_all();
        info!(cancelled, "session relay shut down");
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, next_message, recv};
    use vocrypt_core::OutboundEvent;
    use vocrypt_store::SqliteStore;

    fn relay() -> SessionRelay {
        SessionRelay::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            None,
            Arc::new(MetricsRecorder::new()),
            RelayConfig::default(),
        )
    }

    #[tokio::test]
    async fn session_reports_live_count() {
        let relay = relay();
        let session = relay.create_session("happy").await.unwrap();
        assert_eq!(relay.session(&session.id).await.unwrap().connected_device_count, 0);

        let (out, _rx) = relay.open_channel();
        let conn = ConnectionId::new();
        let _m = relay.join(&session.id, &conn, out).await.unwrap();
        assert_eq!(relay.session(&session.id).await.unwrap().connected_device_count, 1);

        assert!(relay.leave(&conn));
        assert_eq!(relay.session(&session.id).await.unwrap().connected_device_count, 0);
    }

    #[tokio::test]
    async fn audio_reaches_joined_peer_and_leaves_no_history() {
        let relay = relay();
        let session = relay.create_session("calm").await.unwrap();
        let elsewhere = relay.create_session("calm").await.unwrap();

        let a = ConnectionId::new();
        let (a_out, _a_rx) = relay.open_channel();
        let (b_out, mut b_rx) = relay.open_channel();
        let (c_out, mut c_rx) = relay.open_channel();
        let _ma = relay.join(&session.id, &a, a_out).await.unwrap();
        let _mb = relay.join(&session.id, &ConnectionId::new(), b_out).await.unwrap();
        let _mc = relay.join(&elsewhere.id, &ConnectionId::new(), c_out).await.unwrap();
        drain(&mut b_rx);
        drain(&mut c_rx);

        relay.relay_audio(&session.id, &a, "opus-frame".into()).unwrap();
        assert_eq!(recv(&mut b_rx).await.name(), "audio_signal");
        assert!(c_rx.try_recv().is_err());

        let history = relay
            .history(&session.id, HistoryQuery::default())
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn dropped_transport_notifies_remaining_members() {
        let relay = relay();
        let session = relay.create_session("wise").await.unwrap();
        let (a_out, a_rx) = relay.open_channel();
        let (b_out, mut b_rx) = relay.open_channel();
        let a = relay.join(&session.id, &ConnectionId::new(), a_out).await.unwrap();
        let _b = relay.join(&session.id, &ConnectionId::new(), b_out).await.unwrap();
        drain(&mut b_rx);

        // Transport teardown drops the receiver and the membership.
        drop(a_rx);
        drop(a);

        match &*recv(&mut b_rx).await {
            OutboundEvent::Status {
                connected_device_count,
                ..
            } => assert_eq!(*connected_device_count, 1),
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_session_rejects_everything_but_history() {
        let relay = relay();
        let session = relay.create_session("professional").await.unwrap();
        let (out, mut rx) = relay.open_channel();
        let conn = ConnectionId::new();
        let _m = relay.join(&session.id, &conn, out).await.unwrap();
        relay
            .submit(&session.id, MessageType::User, "minutes".into())
            .await
            .unwrap();
        assert_eq!(next_message(&mut rx).await.sequence_number, 1);

        let closed = relay.close_session(&session.id).await.unwrap();
        assert!(!closed.is_active);
        assert_eq!(relay.session_of(&conn), None);
        assert_eq!(relay.sequences.current(&session.id), 0);

        assert!(matches!(
            relay.session(&session.id).await,
            Err(RelayError::SessionNotFound(_))
        ));
        assert!(relay
            .submit(&session.id, MessageType::User, "late".into())
            .await
            .is_err());
        assert!(relay.relay_audio(&session.id, &conn, "x".into()).is_err());
        let (again, _rx) = relay.open_channel();
        assert!(relay.join(&session.id, &ConnectionId::new(), again).await.is_err());

        let history = relay
            .history(&session.id, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn history_of_unknown_session_fails() {
        let relay = relay();
        let err = relay
            .history(&SessionId::from_raw("sess_x"), HistoryQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "session_not_found");
    }

    #[tokio::test]
    async fn shutdown_with_nothing_pending() {
        assert_eq!(relay().shutdown(), 0);
    }
}
