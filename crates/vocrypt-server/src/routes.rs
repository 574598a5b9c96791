//! REST handlers under `/api`, plus health and metrics.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use vocrypt_core::{Message, MessageType, Mood, MoodInfo, Session, SessionId};
use vocrypt_engine::RelayError;
use vocrypt_store::HistoryQuery;
use vocrypt_telemetry::MetricSample;

use crate::server::AppState;

/// Error body: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug)]
pub enum ApiError {
    Relay(RelayError),
    BadRequest { code: &'static str, message: String },
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Relay(RelayError::InvalidMood(_)) | Self::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Relay(RelayError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Relay(RelayError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Relay(RelayError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Relay(RelayError::Responder(_)) => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Relay(e) => e.error_kind(),
            Self::BadRequest { code, .. } => code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = ?self, "request failed");
        }
        let message = match &self {
            Self::Relay(e) => e.to_string(),
            Self::BadRequest { message, .. } => message.clone(),
        };
        let body = json!({ "error": { "code": self.code(), "message": message } });
        (status, Json(body)).into_response()
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Vocrypt AI Communication API" }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub mood: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.relay.create_session(&request.mood).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.relay.session(&SessionId::from_raw(id)).await?))
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.relay.close_session(&SessionId::from_raw(id)).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub after: Option<u64>,
    pub limit: Option<u32>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let query = HistoryQuery::new(params.after, params.limit);
    Ok(Json(
        state
            .relay
            .history(&SessionId::from_raw(id), query)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let message_type = match request.message_type.as_deref() {
        None => MessageType::User,
        Some(raw) => raw.parse::<MessageType>().map_err(|message| ApiError::BadRequest {
            code: "invalid_message_type",
            message,
        })?,
    };
    let message = state
        .relay
        .submit(&SessionId::from_raw(id), message_type, request.content)
        .await?;
    Ok(Json(message))
}

pub async fn moods() -> Json<Vec<MoodInfo>> {
    Json(Mood::catalog())
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Vec<MetricSample>> {
    Json(state.relay.metrics().snapshot())
}
