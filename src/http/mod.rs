//! HTTP surface
//!
//! - `POST /api/chat`: validate the body, consult the rate gate, then stream
//!   the response loop as server-sent events
//! - `GET /health`: liveness probe
//!
//! A malformed body is rejected before any quota is consumed. Rejected
//! requests never reach the model.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, StreamExt};
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use crate::error::ChatError;
use crate::messages::ChatRequest;
use crate::orchestrator::{LoopEvent, ResponseLoop};
use crate::rate_limit::{ClientKey, Decision, RateLimiter};
use crate::streaming::{DONE_MARKER, STREAM_HEADER, STREAM_VERSION};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// User-facing message for a rejected request.
pub const RATE_LIMITED_MESSAGE: &str = "요청 횟수를 초과했습니다. 잠시 후 다시 시도해주세요.";

const CLIENT_HEADERS: [&str; 2] = ["x-forwarded-for", "x-real-ip"];

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub chat: ResponseLoop,
}

impl AppState {
    pub fn new(limiter: Arc<dyn RateLimiter>, chat: ResponseLoop) -> Self {
        Self { limiter, chat }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

/// `x-forwarded-for`, then `x-real-ip`, then the shared `unknown` bucket.
pub fn client_key(headers: &HeaderMap) -> ClientKey {
    CLIENT_HEADERS
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(ClientKey::new)
        .unwrap_or_else(ClientKey::unknown)
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let client = client_key(&headers);
    let span = info_span!("chat", client = %client);
    handle_chat(state, client, body).instrument(span).await
}

async fn handle_chat(
    state: AppState,
    client: ClientKey,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejecting malformed body");
            return ChatError::malformed(rejection.body_text()).into_response();
        }
    };
    let prepared = match state.chat.prepare(&request.messages) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "rejecting malformed conversation");
            return e.into_response();
        }
    };

    let limit = state.limiter.limit();
    let decision = state.limiter.check(&client);
    if !decision.allowed {
        info!(limit, "rate limit exceeded");
        return rate_limited(limit, &decision);
    }
    info!(remaining = decision.remaining, messages = request.messages.len(), "chat admitted");

    let events = state.chat.stream(prepared).filter_map(|event| async move {
        match event {
            LoopEvent::Chunk(chunk) => Some(Event::default().json_data(&chunk)),
            LoopEvent::Finished(_) => None,
        }
    });
    let done = stream::once(async { Ok::<_, axum::Error>(Event::default().data(DONE_MARKER)) });
    let sse = Sse::new(events.chain(done)).keep_alive(KeepAlive::default());

    let mut headers = quota_headers(limit, decision.remaining);
    headers.insert(
        HeaderName::from_static(STREAM_HEADER),
        HeaderValue::from_static(STREAM_VERSION),
    );
    (headers, sse).into_response()
}

fn quota_headers(limit: u32, remaining: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static(RATE_LIMIT_LIMIT), HeaderValue::from(limit));
    headers.insert(HeaderName::from_static(RATE_LIMIT_REMAINING), HeaderValue::from(remaining));
    headers
}

fn rate_limited(limit: u32, decision: &Decision) -> Response {
    let mut headers = quota_headers(limit, 0);
    let retry_after = decision
        .reset_at
        .saturating_duration_since(tokio::time::Instant::now())
        .as_secs()
        .max(1);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Json(json!({ "error": RATE_LIMITED_MESSAGE })),
    )
        .into_response()
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::MalformedRequest { .. } | ChatError::Serialization(_) => StatusCode::BAD_REQUEST,
            ChatError::ModelProvider { .. } | ChatError::OpenAI(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            ChatError::RateLimitExceeded { .. } => RATE_LIMITED_MESSAGE.to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
