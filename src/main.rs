//! # vocrypt
//!
//! Session relay server binary: loads settings, opens the database, wires
//! the responder and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;

use vocrypt_core::Responder;
use vocrypt_engine::SessionRelay;
use vocrypt_responder::{OpenAiResponder, RetryingResponder};
use vocrypt_store::{Database, SqliteStore};
use vocrypt_telemetry::init_telemetry;

use crate::settings::{load_settings_from_path, settings_path, Settings};

/// Vocrypt session relay server.
#[derive(Parser, Debug)]
#[command(name = "vocrypt", about = "Vocrypt session relay server")]
struct Cli {
    /// Settings file (defaults to `~/.vocrypt/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Default log level; `RUST_LOG` still wins.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(self, settings: &mut Settings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = self.db_path {
            settings.storage.db_path = path;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.json {
            settings.logging.json = true;
        }
    }
}

fn build_responder(settings: &Settings) -> Result<Option<Arc<dyn Responder>>> {
    let Some(key) = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()) else {
        tracing::warn!("OPENAI_API_KEY not set, AI replies disabled");
        return Ok(None);
    };
    let openai = OpenAiResponder::new(SecretString::from(key), settings.openai_config())
        .context("failed to build OpenAI client")?;
    tracing::info!(model = %settings.responder.model, base_url = %settings.responder.base_url, "AI replies enabled");
    let responder: Arc<dyn Responder> =
        Arc::new(RetryingResponder::new(openai, settings.retry_config()));
    Ok(Some(responder))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    let telemetry = init_telemetry(settings.telemetry_config());
    tracing::info!(settings = %path.display(), "starting vocrypt");

    let db = Database::open(&settings.storage.db_path).with_context(|| {
        format!("failed to open database at {}", settings.storage.db_path.display())
    })?;
    tracing::info!(path = %settings.storage.db_path.display(), "database opened");

    let relay = Arc::new(SessionRelay::new(
        Arc::new(SqliteStore::new(db)),
        build_responder(&settings)?,
        telemetry.metrics(),
        settings.relay_config(),
    ));

    let handle = vocrypt_server::start(settings.server_config(), Arc::clone(&relay))
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.addr, "vocrypt ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    let cancelled = relay.shutdown();
    handle
        .shutdown(Duration::from_secs(settings.server.shutdown_grace_secs))
        .await;
    tracing::info!(cancelled_replies = cancelled, "shutdown complete");
    Ok(())
}
