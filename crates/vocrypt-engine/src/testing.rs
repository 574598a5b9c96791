use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vocrypt_core::{Message, OutboundEvent, Session, SessionId};
use vocrypt_store::{ChatStore, HistoryQuery, SqliteStore, StoreError, StoredSession};
use vocrypt_telemetry::MetricsRecorder;

use crate::hub::{ConnectionHub, OutboundReceiver, DEFAULT_QUEUE_CAPACITY};
use crate::registry::SessionRegistry;
use crate::sequence::SequenceAllocator;

/// Registry + hub over an in-memory store.
pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<ConnectionHub>,
    pub metrics: Arc<MetricsRecorder>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY).await
    }

    pub async fn with_queue_capacity(capacity: usize) -> Self {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = Arc::new(SessionRegistry::new(
            store,
            Arc::new(SequenceAllocator::new()),
        ));
        let metrics = Arc::new(MetricsRecorder::new());
        let hub = Arc::new(ConnectionHub::new(
            Arc::clone(&registry),
            capacity,
            Arc::clone(&metrics),
        ));
        Self {
            registry,
            hub,
            metrics,
        }
    }

    pub async fn session(&self, mood: &str) -> Session {
        self.registry.create(mood).await.unwrap()
    }
}

/// Discard whatever is queued.
pub fn drain(rx: &mut OutboundReceiver) {
    while rx.try_recv().is_ok() {}
}

pub async fn recv(rx: &mut OutboundReceiver) -> Arc<OutboundEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("outbound queue closed")
}

/// Next `new_message`, skipping status events.
pub async fn next_message(rx: &mut OutboundReceiver) -> Message {
    loop {
        match &*recv(rx).await {
            OutboundEvent::NewMessage { message, .. } => return message.clone(),
            OutboundEvent::Status { .. } => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }
}

/// Store that refuses writes. By default every write fails; with
/// [`FailingStore::appends_only`] sessions work and only messages fail.
pub struct FailingStore {
    inner: SqliteStore,
    fail_sessions: bool,
    pub failed_appends: AtomicUsize,
}

impl Default for FailingStore {
    fn default() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            fail_sessions: true,
            failed_appends: AtomicUsize::new(0),
        }
    }
}

impl FailingStore {
    pub fn appends_only() -> Self {
        Self {
            fail_sessions: false,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatStore for FailingStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        if self.fail_sessions {
            return Err(StoreError::Database("disk full".into()));
        }
        self.inner.insert_session(session).await
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<StoredSession>, StoreError> {
        self.inner.load_session(id).await
    }

    async fn set_session_active(&self, id: &SessionId, active: bool) -> Result<(), StoreError> {
        if self.fail_sessions {
            return Err(StoreError::Database("disk full".into()));
        }
        self.inner.set_session_active(id, active).await
    }

    async fn append_message(&self, _message: &Message) -> Result<(), StoreError> {
        self.failed_appends.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Database("disk full".into()))
    }

    async fn list_messages(
        &self,
        id: &SessionId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.list_messages(id, query).await
    }
}
