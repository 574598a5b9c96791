use tracing::instrument;

use vocrypt_core::{Message, MessageId, MessageType, Mood, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. A second row with the same `(session_id, sequence_number)`
    /// is rejected with `StoreError::Conflict`.
    #[instrument(skip(self, message), fields(
        session_id = %message.session_id,
        seq = message.sequence_number,
    ))]
    pub fn append(&self, message: &Message) -> Result<(), StoreError> {
        let seq = i64::try_from(message.sequence_number)
            .map_err(|_| StoreError::Database("sequence number out of range".into()))?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, type, content, sequence_number, mood, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.id.as_str(),
                    message.session_id.as_str(),
                    message.message_type.as_str(),
                    message.content,
                    seq,
                    message.mood.name(),
                    message.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// List messages for a session in ascending sequence order, optionally
    /// starting strictly after `after`.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(
        &self,
        session_id: &SessionId,
        after: Option<u64>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let after = i64::try_from(after.unwrap_or(0)).unwrap_or(i64::MAX);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, type, content, sequence_number, mood, timestamp
                 FROM messages
                 WHERE session_id = ?1 AND sequence_number > ?2
                 ORDER BY sequence_number ASC
                 LIMIT ?3",
            )?;
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), after, limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    const T: &str = "messages";
    let id: String = row_helpers::get(row, 0, T, "id")?;
    let session_id: String = row_helpers::get(row, 1, T, "session_id")?;
    let type_raw: String = row_helpers::get(row, 2, T, "type")?;
    let content: String = row_helpers::get(row, 3, T, "content")?;
    let sequence_number = row_helpers::get_u64(row, 4, T, "sequence_number")?;
    let mood_raw: String = row_helpers::get(row, 5, T, "mood")?;
    let ts_raw: String = row_helpers::get(row, 6, T, "timestamp")?;

    let message_type: MessageType = row_helpers::parse_enum(&type_raw, T, "type")?;
    let mood: Mood = row_helpers::parse_enum(&mood_raw, T, "mood")?;
    let timestamp = row_helpers::parse_timestamp(&ts_raw, T, "timestamp")?;

    Ok(Message {
        id: MessageId::from_raw(id),
        session_id: SessionId::from_raw(session_id),
        message_type,
        content,
        sequence_number,
        timestamp,
        mood,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use chrono::Utc;
    use vocrypt_core::Session;

    fn setup() -> (MessageRepo, SessionRepo, Session) {
        let db = Database::in_memory().unwrap();
        let sessions = SessionRepo::new(db.clone());
        let session = Session::new(Mood::Calm);
        sessions.insert(&session).unwrap();
        (MessageRepo::new(db), sessions, session)
    }

    fn message(session: &Session, seq: u64, content: &str) -> Message {
        Message {
            id: MessageId::new(),
            session_id: session.id.clone(),
            message_type: MessageType::User,
            content: content.into(),
            sequence_number: seq,
            timestamp: Utc::now(),
            mood: session.mood,
        }
    }

    #[test]
    fn list_returns_ascending_sequence_order() {
        let (repo, _, session) = setup();
        // Persistence may complete out of order.
        for seq in [3, 1, 2] {
            repo.append(&message(&session, seq, &format!("m{seq}"))).unwrap();
        }

        let listed = repo.list(&session.id, None, 100).unwrap();
        let seqs: Vec<u64> = listed.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(listed[0].content, "m1");
    }

    #[test]
    fn list_after_and_limit() {
        let (repo, _, session) = setup();
        for seq in 1..=5 {
            repo.append(&message(&session, seq, "x")).unwrap();
        }

        let listed = repo.list(&session.id, Some(2), 2).unwrap();
        let seqs: Vec<u64> = listed.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn duplicate_sequence_conflicts() {
        let (repo, _, session) = setup();
        repo.append(&message(&session, 1, "a")).unwrap();
        let err = repo.append(&message(&session, 1, "b")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn unknown_session_is_rejected() {
        let (repo, _, session) = setup();
        let mut orphan = message(&session, 1, "a");
        orphan.session_id = SessionId::from_raw("sess_missing");
        assert!(repo.append(&orphan).is_err());
    }

    #[test]
    fn high_water_tracks_max_sequence() {
        let (repo, sessions, session) = setup();
        repo.append(&message(&session, 1, "a")).unwrap();
        repo.append(&message(&session, 4, "b")).unwrap();

        let row = sessions.get(&session.id).unwrap().unwrap();
        assert_eq!(row.high_water, 4);
        assert_eq!(repo.list(&session.id, None, 10).unwrap().len(), 2);
    }

    #[test]
    fn message_fields_survive_storage() {
        let (repo, _, session) = setup();
        let mut original = message(&session, 1, "hello there");
        original.message_type = MessageType::Ai;
        repo.append(&original).unwrap();

        let listed = repo.list(&session.id, None, 10).unwrap();
        assert_eq!(listed, vec![original]);
    }
}
