//! Responder implementations: an OpenAI-compatible chat-completions client,
//! a retrying wrapper, and a scripted mock for tests.

pub mod mock;
pub mod openai;
pub mod retry;

pub use mock::{MockReply, MockResponder};
pub use openai::{OpenAiConfig, OpenAiResponder};
pub use retry::{RetryConfig, RetryingResponder};
