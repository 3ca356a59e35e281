//! Sass Server - HTTP proxy for the persona chat
//!
//! Exposes one streaming endpoint per persona. The browser posts the
//! conversation, the server shapes it for the persona, calls the provider and
//! relays the reply back as plain text, one chunk per provider fragment.
//!
//! # Routes
//!
//! | Method | Path                  | Purpose                                  |
//! |--------|-----------------------|------------------------------------------|
//! | POST   | `/api/chat/:persona`  | Stream a persona reply                   |
//! | POST   | `/api/chat`           | Same, for the teenager                   |
//! | GET    | `/api/personas`       | Persona list with typing profiles        |
//! | GET    | `/healthz`            | Liveness and provider reachability       |
//!
//! # Status codes
//!
//! - `200` `text/plain` stream
//! - `400` invalid JSON or invalid messages
//! - `404` unknown persona
//! - `500` provider API key missing or invalid
//! - `502` provider call failed before streaming started

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use sass_core::reveal::DelayProfile;
use sass_core::streaming::{relay, CancelSignal};
use sass_core::{
    ChatBackend, ChatMessage, ChatRequest, ChatLimits, InputValidator, Persona, PersonaTable,
    ValidationError,
};

/// Errors returned as JSON bodies
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body was not JSON
    #[error("Invalid JSON")]
    InvalidJson,

    /// `messages` missing or malformed
    #[error("Invalid messages format")]
    InvalidMessages,

    /// Messages failed validation
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// No persona with this slug
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// Provider credentials unusable
    #[error("OpenAI API key is missing or invalid")]
    MissingApiKey,

    /// Provider call failed before streaming
    #[error("Upstream request failed")]
    Upstream(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson | Self::InvalidMessages | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownPersona(_) => StatusCode::NOT_FOUND,
            Self::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Upstream(details) => json!({ "error": self.to_string(), "details": details }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn ChatBackend>,
    personas: Arc<PersonaTable>,
    validator: InputValidator,
    credentials_ok: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.backend.name())
            .field("credentials_ok", &self.credentials_ok)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create state around a chat backend
    pub fn new(backend: Arc<dyn ChatBackend>, personas: PersonaTable, limits: ChatLimits) -> Self {
        Self {
            backend,
            personas: Arc::new(personas),
            validator: InputValidator::new(limits),
            credentials_ok: true,
        }
    }

    /// Record whether the provider API key is usable. Without one every chat
    /// request fails with a 500 before the provider is contacted.
    #[must_use]
    pub fn with_credentials(mut self, ok: bool) -> Self {
        self.credentials_ok = ok;
        self
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/:persona", post(chat_persona))
        .route("/api/chat", post(chat_default))
        .route("/api/personas", get(list_personas))
        .route("/healthz", get(healthz))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    request_id = %Uuid::new_v4(),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn chat_persona(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let persona = slug
        .parse::<Persona>()
        .map_err(|_| ApiError::UnknownPersona(slug))?;
    stream_chat(&state, persona, &body).await
}

async fn chat_default(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    stream_chat(&state, Persona::Teenager, &body).await
}

/// Parse a chat body into a request
///
/// The interruption flag is read from `isInterruption`, `data.isInterruption`
/// or `options.body.data.isInterruption`, whichever is set.
pub fn parse_chat_body(persona: Persona, body: &[u8]) -> Result<ChatRequest, ApiError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)?;
    let messages: Vec<ChatMessage> = value
        .get("messages")
        .cloned()
        .and_then(|m| serde_json::from_value(m).ok())
        .ok_or(ApiError::InvalidMessages)?;

    let interruption = [
        value.pointer("/isInterruption"),
        value.pointer("/data/isInterruption"),
        value.pointer("/options/body/data/isInterruption"),
    ]
    .into_iter()
    .flatten()
    .any(|flag| flag.as_bool() == Some(true));

    Ok(ChatRequest::new(persona, messages).interrupting(interruption))
}

async fn stream_chat(state: &AppState, persona: Persona, body: &[u8]) -> Result<Response, ApiError> {
    let request = parse_chat_body(persona, body)?;
    state.validator.validate_request(&request)?;
    if !state.credentials_ok {
        tracing::error!("Chat request refused: provider API key is missing or invalid");
        return Err(ApiError::MissingApiKey);
    }

    let tokens = state.backend.send_chat(&request).await.map_err(|e| {
        tracing::warn!(persona = %persona, error = %e, "Upstream call failed");
        ApiError::Upstream(e.to_string())
    })?;

    tracing::info!(
        persona = %persona,
        messages = request.messages.len(),
        interruption = request.interruption,
        "Streaming reply"
    );

    // Client disconnect drops the body, which drops the token receiver.
    let body = Body::from_stream(relay(tokens, CancelSignal::never()));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// One entry of `GET /api/personas`
#[derive(Debug, Serialize)]
pub struct PersonaInfo {
    /// Route slug
    pub slug: &'static str,
    /// Display name
    pub name: &'static str,
    /// One-liner
    pub tagline: &'static str,
    /// Typing cadence for client-side reveal
    pub typing: DelayProfile,
}

async fn list_personas(State(state): State<AppState>) -> Json<Vec<PersonaInfo>> {
    Json(
        state
            .personas
            .iter()
            .map(|(persona, profile)| PersonaInfo {
                slug: persona.slug(),
                name: persona.display_name(),
                tagline: persona.tagline(),
                typing: profile.typing,
            })
            .collect(),
    )
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let reachable = state.credentials_ok && state.backend.health_check().await;
    if !reachable {
        tracing::warn!(backend = state.backend.name(), "Provider health check failed");
    }
    Json(json!({
        "status": "ok",
        "backend": state.backend.name(),
        "credentials": state.credentials_ok,
        "provider_reachable": reachable,
    }))
}
