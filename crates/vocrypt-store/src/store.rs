use async_trait::async_trait;
use tracing::debug;

use vocrypt_core::{Message, Session, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::sessions::SessionRepo;

pub use crate::sessions::SessionRow as StoredSession;

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
pub const MAX_HISTORY_LIMIT: u32 = 1000;

/// Paging window for message history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only return messages with a sequence number strictly greater than this.
    pub after: Option<u64>,
    pub limit: u32,
}

impl HistoryQuery {
    pub fn new(after: Option<u64>, limit: Option<u32>) -> Self {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Self { after, limit }
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Durable storage for sessions and their messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn load_session(&self, id: &SessionId) -> Result<Option<StoredSession>, StoreError>;

    async fn set_session_active(&self, id: &SessionId, active: bool) -> Result<(), StoreError>;

    async fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    async fn list_messages(
        &self,
        id: &SessionId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, StoreError>;
}

/// SQLite-backed store. Queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    sessions: SessionRepo,
    messages: MessageRepo,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db),
        }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let repo = self.sessions.clone();
        let session = session.clone();
        tokio::task::spawn_blocking(move || repo.insert(&session)).await?
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<StoredSession>, StoreError> {
        let repo = self.sessions.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || repo.get(&id)).await?
    }

    async fn set_session_active(&self, id: &SessionId, active: bool) -> Result<(), StoreError> {
        let repo = self.sessions.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || repo.set_active(&id, active)).await?
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let repo = self.messages.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || repo.append(&message)).await?
    }

    async fn list_messages(
        &self,
        id: &SessionId,
        query: HistoryQuery,
    ) -> Result<Vec<Message>, StoreError> {
        let repo = self.messages.clone();
        let id = id.clone();
        let messages =
            tokio::task::spawn_blocking(move || repo.list(&id, query.after, query.limit)).await??;
        debug!(count = messages.len(), "history loaded");
        Ok(messages)
    }
}
