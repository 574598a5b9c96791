use async_trait::async_trait;

use crate::errors::ResponderError;
use crate::mood::Mood;

/// Produces an AI-authored reply to a user message.
///
/// Implementations are opaque to the relay: it hands over the session mood
/// and the user's text and publishes whatever text comes back.
#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, mood: Mood, prompt: &str) -> Result<String, ResponderError>;
}
