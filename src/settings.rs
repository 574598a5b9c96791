//! Layered settings for the `vocrypt` binary.
//!
//! Loading order, lowest priority first:
//! 1. compiled defaults ([`Settings::default()`])
//! 2. `~/.vocrypt/settings.json` or the `--config` file, deep-merged over defaults
//! 3. environment overrides (`PORT`, `VOCRYPT_*`, `OPENAI_BASE_URL`, `OPENAI_MODEL`)
//!
//! Command-line flags are applied last by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use vocrypt_engine::RelayConfig;
use vocrypt_responder::{OpenAiConfig, RetryConfig};
use vocrypt_server::ServerConfig;
use vocrypt_telemetry::{parse_level, TelemetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub responder: ResponderSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_message_size: usize,
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight requests and sockets.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: server.host,
            port: server.port,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            heartbeat_timeout_secs: server.heartbeat_timeout_secs,
            max_message_size: server.max_message_size,
            request_timeout_secs: server.request_timeout_secs,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySettings {
    pub outbound_queue_capacity: usize,
    pub max_audio_payload_bytes: usize,
    pub reply_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            outbound_queue_capacity: relay.outbound_queue_capacity,
            max_audio_payload_bytes: relay.max_audio_payload_bytes,
            reply_timeout_secs: relay.reply_timeout.as_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResponderSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ResponderSettings {
    fn default() -> Self {
        let openai = OpenAiConfig::default();
        Self {
            base_url: openai.base_url,
            model: openai.model,
            temperature: openai.temperature,
            request_timeout_secs: openai.request_timeout.as_secs(),
            max_retries: RetryConfig::default().max_retries,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: vocrypt_home().join("database").join("vocrypt.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl Settings {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            heartbeat_interval_secs: self.server.heartbeat_interval_secs,
            heartbeat_timeout_secs: self.server.heartbeat_timeout_secs,
            max_message_size: self.server.max_message_size,
            request_timeout_secs: self.server.request_timeout_secs,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_audio_payload_bytes: self.relay.max_audio_payload_bytes,
            outbound_queue_capacity: self.relay.outbound_queue_capacity.max(1),
            reply_timeout: Duration::from_secs(self.relay.reply_timeout_secs.max(1)),
        }
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.responder.base_url.clone(),
            model: self.responder.model.clone(),
            temperature: self.responder.temperature,
            request_timeout: Duration::from_secs(self.responder.request_timeout_secs.max(1)),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.responder.max_retries,
            ..RetryConfig::default()
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: parse_level(&self.logging.level),
            module_levels: Vec::new(),
            json: self.logging.json,
        }
    }
}

fn vocrypt_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vocrypt")
}

/// `~/.vocrypt/settings.json`
pub fn settings_path() -> PathBuf {
    vocrypt_home().join("settings.json")
}

/// Load settings from `path` (a missing file means defaults) and apply
/// environment overrides.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let mut settings = read_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn read_file(path: &Path) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let user: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Objects merge per key, anything else in `source` replaces `target`.
/// Nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from `lookup`. Empty or malformed values are ignored.
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(raw) = read("PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => tracing::warn!(key = "PORT", value = %raw, "invalid port, ignoring"),
        }
    }
    if let Some(host) = read("VOCRYPT_HOST") {
        settings.server.host = host;
    }
    if let Some(path) = read("VOCRYPT_DB_PATH") {
        settings.storage.db_path = PathBuf::from(path);
    }
    if let Some(url) = read("OPENAI_BASE_URL") {
        settings.responder.base_url = url;
    }
    if let Some(model) = read("OPENAI_MODEL") {
        settings.responder.model = model;
    }
    if let Some(level) = read("VOCRYPT_LOG_LEVEL") {
        settings.logging.level = level;
    }
}
