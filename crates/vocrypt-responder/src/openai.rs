use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use vocrypt_core::{Mood, Responder, ResponderError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.6;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Chat-completions client. The mood's system prompt frames each request.
pub struct OpenAiResponder {
    client: Client,
    api_key: SecretString,
    config: OpenAiConfig,
}

impl OpenAiResponder {
    pub fn new(api_key: SecretString, config: OpenAiConfig) -> Result<Self, ResponderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ResponderError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn classify_transport(&self, e: reqwest::Error) -> ResponderError {
        if e.is_timeout() {
            ResponderError::Timeout(self.config.request_timeout)
        } else {
            ResponderError::NetworkError(e.to_string())
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, prompt), fields(model = %self.config.model, mood = %mood))]
    async fn respond(&self, mood: Mood, prompt: &str) -> Result<String, ResponderError> {
        let body = build_request_body(&self.config.model, self.config.temperature, mood, prompt);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match ResponderError::from_status(status, body) {
                ResponderError::RateLimited { .. } => ResponderError::RateLimited { retry_after },
                other => other,
            });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| ResponderError::InvalidResponse(e.to_string()))?;
        let text = parse_completion(payload)?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}


/// Build the chat-completions request body for one reply.
pub fn build_request_body(model: &str, temperature: f32, mood: Mood, prompt: &str) -> Value {
    json!({
        "model": model,
        "temperature": temperature,
        "messages": [
            { "role": "system", "content": mood.system_prompt() },
            { "role": "user", "content": prompt },
        ],
    })
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Extract the first choice's text, trimmed. Empty or missing content is an
/// invalid response.
pub fn parse_completion(payload: Value) -> Result<String, ResponderError> {
    let completion: Completion = serde_json::from_value(payload)
        .map_err(|e| ResponderError::InvalidResponse(e.to_string()))?;
    let text = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ResponderError::InvalidResponse("empty completion".into()));
    }
    Ok(text)
}
