use std::time::Duration;

/// Failure modes of the AI responder.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ResponderError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ResponderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::NetworkError(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::InvalidResponse(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidResponse(_) => "invalid_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ResponderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ResponderError::ServerError { status: 503, body: "busy".into() }.is_retryable());
        assert!(ResponderError::NetworkError("reset".into()).is_retryable());
        assert!(!ResponderError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn operational_errors_are_neither() {
        for err in [ResponderError::Timeout(Duration::from_secs(1)), ResponderError::Cancelled] {
            assert!(!err.is_retryable());
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn from_status_mapping() {
        assert!(ResponderError::from_status(401, "no key".into()).is_fatal());
        assert!(ResponderError::from_status(400, "bad".into()).is_fatal());
        assert!(ResponderError::from_status(429, "slow down".into()).is_retryable());
        assert!(ResponderError::from_status(502, "gateway".into()).is_retryable());
        assert!(matches!(
            ResponderError::from_status(302, "moved".into()),
            ResponderError::InvalidRequest(_)
        ));
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = ResponderError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(2)));
        assert_eq!(ResponderError::Cancelled.suggested_delay(), None);
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ResponderError::Cancelled.error_kind(), "cancelled");
        assert_eq!(ResponderError::Timeout(Duration::ZERO).error_kind(), "timeout");
    }
}
