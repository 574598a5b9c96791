use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema::{CREATE_TABLES, PRAGMAS, SCHEMA_VERSION};

/// Shared SQLite handle. Every repository clones it; calls are serialized
/// on the inner connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (creating parent directories) and migrate the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Io(format!("{}: {e}", dir.display())))?;
        }
        let db = Self::wrap(Connection::open(path)?, path.to_path_buf())?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::wrap(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn wrap(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        f(&self.conn.lock())
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(|conn| user_version(conn))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn user_version(conn: &Connection) -> Result<u32, StoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring a fresh database up to [`SCHEMA_VERSION`]. Files written by a newer
/// build are refused.
fn migrate(conn: &Connection) -> Result<(), StoreError> {
    match user_version(conn)? {
        0 => {
            conn.execute_batch(CREATE_TABLES)
                .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!(version = SCHEMA_VERSION, "schema created");
            Ok(())
        }
        v if v > SCHEMA_VERSION => Err(StoreError::Database(format!(
            "database schema version {v} is newer than supported {SCHEMA_VERSION}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_is_migrated() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);

        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok(names)
            })
            .unwrap();
        assert_eq!(tables, vec!["messages".to_string(), "sessions".to_string()]);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::in_memory().unwrap();
        let enabled: i64 = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn reopening_a_file_keeps_data_and_version() {
        let dir = std::env::temp_dir().join(format!("vocrypt-store-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("relay.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, mood, created_at, is_active) VALUES ('sess_x', 'calm', '2024-01-01T00:00:00Z', 1)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);

        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = std::env::temp_dir().join(format!("vocrypt-store-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("future.db");
        drop(Database::open(&path).unwrap());
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        }

        assert!(matches!(Database::open(&path), Err(StoreError::Database(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
