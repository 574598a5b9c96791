use vocrypt_core::{ResponderError, SessionId, UnknownMood};
use vocrypt_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid mood: {0}")]
    InvalidMood(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("responder failure: {0}")]
    Responder(#[from] ResponderError),
}

impl RelayError {
    /// Stable code used in logs, metrics labels and wire errors.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidMood(_) => "invalid_mood",
            Self::SessionNotFound(_) => "session_not_found",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Persistence(_) => "persistence_failure",
            Self::Responder(_) => "responder_failure",
        }
    }
}

impl From<UnknownMood> for RelayError {
    fn from(e: UnknownMood) -> Self {
        Self::InvalidMood(e.0)
    }
}
