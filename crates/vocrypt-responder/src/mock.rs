use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use vocrypt_core::{Mood, Responder, ResponderError};

/// Pre-programmed replies for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(ResponderError),
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Responder that pops scripted replies in order. Once the script runs out it
/// either echoes the prompt (see [`MockResponder::echoing`]) or fails.
pub struct MockResponder {
    script: Mutex<VecDeque<MockReply>>,
    echo_when_empty: bool,
    prompts: Mutex<Vec<(Mood, String)>>,
    call_count: AtomicUsize,
}

impl MockResponder {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            echo_when_empty: false,
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Replies with `"{mood}: {prompt}"` for every call.
    pub fn echoing() -> Self {
        Self {
            echo_when_empty: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<(Mood, String)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Responder for MockResponder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn respond(&self, mood: Mood, prompt: &str) -> Result<String, ResponderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push((mood, prompt.to_string()));

        let next = self.script.lock().pop_front();
        let mut current = match next {
            Some(reply) => reply,
            None if self.echo_when_empty => return Ok(format!("{mood}: {prompt}")),
            None => {
                return Err(ResponderError::InvalidRequest(format!(
                    "MockResponder: no reply configured for call {idx}"
                )))
            }
        };

        loop {
            match current {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_in_order() {
        let mock = MockResponder::new(vec![MockReply::text("one"), MockReply::text("two")]);
        assert_eq!(mock.respond(Mood::Calm, "a").await.unwrap(), "one");
        assert_eq!(mock.respond(Mood::Calm, "b").await.unwrap(), "two");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(
            mock.prompts(),
            vec![(Mood::Calm, "a".to_string()), (Mood::Calm, "b".to_string())]
        );
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let mock = MockResponder::new(vec![]);
        let err = mock.respond(Mood::Happy, "x").await.unwrap_err();
        assert!(matches!(err, ResponderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn scripted_error_is_returned() {
        let mock = MockResponder::new(vec![MockReply::Error(ResponderError::NetworkError(
            "reset".into(),
        ))]);
        let err = mock.respond(Mood::Happy, "x").await.unwrap_err();
        assert_eq!(err.error_kind(), "network_error");
    }

    #[tokio::test]
    async fn echoing_never_runs_out() {
        let mock = MockResponder::echoing();
        for _ in 0..3 {
            assert_eq!(mock.respond(Mood::Wise, "hi").await.unwrap(), "wise: hi");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_resolves_inner_reply() {
        let mock = MockResponder::new(vec![MockReply::delayed(
            Duration::from_secs(5),
            MockReply::text("late"),
        )]);
        let started = tokio::time::Instant::now();
        assert_eq!(mock.respond(Mood::Calm, "x").await.unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
