use tracing::instrument;

use vocrypt_core::{Mood, Session, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A session row together with the highest sequence number recorded for it.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRow {
    pub session: Session,
    pub high_water: u64,
}

#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, session), fields(session_id = %session.id, mood = %session.mood))]
    pub fn insert(&self, session: &Session) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, mood, created_at, is_active) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    session.id.as_str(),
                    session.mood.name(),
                    session.created_at.to_rfc3339(),
                    session.is_active,
                ],
            )?;
            Ok(())
        })
    }

    /// Get a session by ID. Returns `None` when no row exists.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<Option<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.mood, s.created_at, s.is_active,
                        COALESCE((SELECT MAX(m.sequence_number) FROM messages m WHERE m.session_id = s.id), 0)
                 FROM sessions s WHERE s.id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row).map(Some),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn set_active(&self, id: &SessionId, active: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    const T: &str = "sessions";
    let id: String = row_helpers::get(row, 0, T, "id")?;
    let mood_raw: String = row_helpers::get(row, 1, T, "mood")?;
    let created_raw: String = row_helpers::get(row, 2, T, "created_at")?;
    let is_active: bool = row_helpers::get(row, 3, T, "is_active")?;
    let high_water = row_helpers::get_u64(row, 4, T, "high_water")?;

    let mood: Mood = row_helpers::parse_enum(&mood_raw, T, "mood")?;
    let created_at = row_helpers::parse_timestamp(&created_raw, T, "created_at")?;

    Ok(SessionRow {
        session: Session {
            id: SessionId::from_raw(id),
            mood,
            created_at,
            is_active,
            connected_device_count: 0,
        },
        high_water,
    })
}
