use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument};

use vocrypt_core::{Mood, Session, SessionId};
use vocrypt_store::ChatStore;

use crate::error::RelayError;
use crate::sequence::SequenceAllocator;

/// Session records, cached in memory and backed by the store.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    store: Arc<dyn ChatStore>,
    sequences: Arc<SequenceAllocator>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ChatStore>, sequences: Arc<SequenceAllocator>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            sequences,
        }
    }

    /// Create a session. Nothing is registered if the store rejects it.
    #[instrument(skip(self))]
    pub async fn create(&self, mood: &str) -> Result<Session, RelayError> {
        let mood: Mood = mood.parse()?;
        let session = Session::new(mood);

        self.store.insert_session(&session).await?;
        self.sequences.seed(&session.id, 0);
        self.sessions.insert(session.id.clone(), session.clone());

        info!(session_id = %session.id, mood = %mood, "session created");
        Ok(session)
    }

    /// Look up a session, active or closed. Sessions missing from memory are
    /// restored from the store; active ones continue numbering from their
    /// highest stored sequence number.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn find(&self, id: &SessionId) -> Result<Session, RelayError> {
        if let Some(session) = self.sessions.get(id) {
            return Ok(session.value().clone());
        }

        let stored = self
            .store
            .load_session(id)
            .await?
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;

        if stored.session.is_active {
            self.sequences.seed(id, stored.high_water);
        }
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert(stored.session)
            .value()
            .clone();

        debug!(high_water = stored.high_water, "session restored from store");
        Ok(session)
    }

    /// Look up an active session.
    pub async fn get(&self, id: &SessionId) -> Result<Session, RelayError> {
        let session = self.find(id).await?;
        if !session.is_active {
            return Err(RelayError::SessionNotFound(id.clone()));
        }
        Ok(session)
    }

    /// In-memory check; sessions not yet restored from the store report false.
    pub fn is_active(&self, id: &SessionId) -> bool {
        self.sessions.get(id).is_some_and(|s| s.is_active)
    }

    /// Mark a session inactive in the store and in memory.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn close(&self, id: &SessionId) -> Result<Session, RelayError> {
        let mut session = self.get(id).await?;
        self.store.set_session_active(id, false).await?;

        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.is_active = false;
        }
        session.is_active = false;

        info!("session closed");
        Ok(session)
    }
}
