pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod store;

pub use database::Database;
pub use error::StoreError;
pub use store::{
    ChatStore, HistoryQuery, SqliteStore, StoredSession, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
