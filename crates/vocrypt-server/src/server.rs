use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use vocrypt_engine::SessionRelay;

use crate::connection;
use crate::routes;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_message_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 256 * 1024,
            request_timeout_secs: 30,
        }
    }
}

/// Liveness and framing limits applied to every WebSocket connection.
#[derive(Clone, Debug)]
pub struct ConnectionLimits {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_message_size: usize,
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs.max(1)),
            max_message_size: config.max_message_size,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<SessionRelay>,
    pub limits: Arc<ConnectionLimits>,
    pub started_at: Instant,
    /// Tripped on shutdown; open WebSocket connections close when it fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(relay: Arc<SessionRelay>, config: &ServerConfig) -> Self {
        Self {
            relay,
            limits: Arc::new(ConnectionLimits::from(config)),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/api", get(routes::root))
        .route("/api/", get(routes::root))
        .route("/api/sessions", post(routes::create_session))
        .route(
            "/api/sessions/{id}",
            get(routes::get_session).delete(routes::close_session),
        )
        .route(
            "/api/sessions/{id}/messages",
            get(routes::list_messages).post(routes::send_message),
        )
        .route("/api/moods", get(routes::moods))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .layer(request_timeout_layer(request_timeout));

    Router::new()
        .route("/ws", get(connection::ws_handler))
        .route("/api/sessions/{id}/ws", get(connection::session_ws_handler))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// REST requests running past `timeout` are answered with 408.
fn request_timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// Bind and serve. Returns a handle used to stop the server.
pub async fn start(
    config: ServerConfig,
    relay: Arc<SessionRelay>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(relay, &config);
    let shutdown = state.shutdown.clone();
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs.max(1)));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "vocrypt server started");

    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting requests, close WebSocket connections and wait for
    /// the server task, up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.cancel();
        if tokio::time::timeout(grace, self.server).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "server did not stop within grace period");
        }
    }
}
