//! HTTP API.
//!
//! - GET /health
//! - GET /versions
//! - POST /prompt
//! - POST /chat
//! - POST /stream

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::server::schemas::{ChatRequest, PromptRequest, ValidatedJson};
use crate::server::streaming::{error_stream, spawn_relay, sse_response};
use crate::upstream::client::CLIENT_IDENTITY;
use crate::upstream::{GenerationRequest, GenerationResult, Generator};

/// Name reported by `/health` and `/versions`.
pub const SERVICE_NAME: &str = "prompt-gateway";

/// Application state shared across handlers.
pub struct AppState {
    pub generator: Arc<dyn Generator>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(generator: Arc<dyn Generator>, config: Arc<Config>) -> Self {
        Self {
            generator,
            config,
            start_time: Instant::now(),
        }
    }

    fn default_model(&self) -> &str {
        &self.config.upstream.default_model
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/versions", get(versions))
        .route("/prompt", post(prompt))
        .route("/chat", post(chat))
        .route("/stream", post(stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Response Types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub service: &'static str,
    pub sdk: &'static str,
    pub model_default: String,
    pub env_key_present: bool,
}

/// Body of a successful `/prompt` or `/chat` call.
pub type GenerationResponse = GenerationResult;

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        service: SERVICE_NAME,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn versions(State(state): State<Arc<AppState>>) -> Json<VersionsResponse> {
    Json(VersionsResponse {
        service: SERVICE_NAME,
        sdk: CLIENT_IDENTITY,
        model_default: state.default_model().to_string(),
        env_key_present: state.config.api_key_present(),
    })
}

async fn prompt(
    State(state): State<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<PromptRequest>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let request = input.into_generation(state.default_model());
    generate(&state, "prompt", request).await
}

async fn chat(
    State(state): State<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<ChatRequest>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let messages = input.messages.len();
    let request = input.into_generation(state.default_model());
    info!(messages, "Folded chat history");
    generate(&state, "chat", request).await
}

async fn generate(
    state: &AppState,
    route: &'static str,
    request: GenerationRequest,
) -> Result<Json<GenerationResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    info!(
        request_id,
        route,
        model = request.model,
        has_instructions = request.instructions.is_some(),
        max_output_tokens = request.max_output_tokens,
        "Generation request"
    );

    match state.generator.generate(request).await {
        Ok(result) => {
            info!(
                request_id,
                route,
                output_chars = result.output.chars().count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation completed"
            );
            Ok(Json(result))
        }
        Err(e) => {
            error!(request_id, route, error = %e, "Generation failed");
            Err(e.into())
        }
    }
}

async fn stream(
    State(state): State<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<PromptRequest>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let request = input.into_generation(state.default_model());

    info!(
        request_id,
        model = request.model,
        max_output_tokens = request.max_output_tokens,
        "Stream request"
    );

    // Headers are committed as soon as the SSE response is returned, so a
    // failure to open the upstream stream is still reported in-band.
    match state.generator.generate_stream(request).await {
        Ok(upstream) => sse_response(spawn_relay(upstream, request_id)),
        Err(e) => {
            error!(request_id, error = %e, "Failed to open upstream stream");
            sse_response(error_stream(e.to_string()))
        }
    }
}
