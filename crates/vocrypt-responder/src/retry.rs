use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use vocrypt_core::{Mood, Responder, ResponderError};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps a responder with exponential-backoff retries.
///
/// Only retryable errors are retried; `retry_after` hints from rate limiting
/// replace the computed delay.
pub struct RetryingResponder<R: Responder> {
    inner: R,
    config: RetryConfig,
    total_retries: AtomicU64,
}

impl<R: Responder> RetryingResponder<R> {
    pub fn new(inner: R, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);

        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[async_trait]
impl<R: Responder> Responder for RetryingResponder<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn respond(&self, mood: Mood, prompt: &str) -> Result<String, ResponderError> {
        let mut attempt = 0;
        loop {
            match self.inner.respond(mood, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => {
                    return Err(e)
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        responder = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockResponder};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
        }
    }

    fn server_error() -> MockReply {
        MockReply::Error(ResponderError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let retrying = RetryingResponder::new(MockResponder::new(vec![MockReply::text("ok")]), fast());
        assert_eq!(retrying.respond(Mood::Calm, "x").await.unwrap(), "ok");
        assert_eq!(retrying.total_retries(), 0);
    }

    #[tokio::test]
    async fn retries_retryable_errors() {
        let mock = MockResponder::new(vec![server_error(), server_error(), MockReply::text("recovered")]);
        let retrying = RetryingResponder::new(mock, fast());
        assert_eq!(retrying.respond(Mood::Calm, "x").await.unwrap(), "recovered");
        assert_eq!(retrying.total_retries(), 2);
        assert_eq!(retrying.inner.call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = MockResponder::new(vec![
            MockReply::Error(ResponderError::AuthenticationFailed("bad key".into())),
            MockReply::text("unreachable"),
        ]);
        let retrying = RetryingResponder::new(mock, fast());
        let err = retrying.respond(Mood::Calm, "x").await.unwrap_err();
        assert!(matches!(err, ResponderError::AuthenticationFailed(_)));
        assert_eq!(retrying.total_retries(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let mock = MockResponder::new(vec![server_error(); 4]);
        let retrying = RetryingResponder::new(mock, fast());
        let err = retrying.respond(Mood::Calm, "x").await.unwrap_err();
        assert!(matches!(err, ResponderError::ServerError { .. }));
        assert_eq!(retrying.total_retries(), 3);
        assert_eq!(retrying.inner.call_count(), 4);
    }

    #[test]
    fn retry_delay_respects_suggested() {
        let retrying = RetryingResponder::new(MockResponder::new(vec![]), RetryConfig::default());
        let delay = retrying.retry_delay(0, Some(Duration::from_secs(5)));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn retry_delay_backs_off_and_caps() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let retrying = RetryingResponder::new(MockResponder::new(vec![]), config);
        assert_eq!(retrying.retry_delay(0, None).as_millis(), 100);
        assert_eq!(retrying.retry_delay(1, None).as_millis(), 200);
        assert_eq!(retrying.retry_delay(5, None).as_millis(), 300);
    }

    #[test]
    fn name_delegates() {
        let retrying = RetryingResponder::new(MockResponder::new(vec![]), RetryConfig::default());
        assert_eq!(retrying.name(), "mock");
    }
}
