use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use url::Url;

use berea_protocol::{ChatErrorBody, ChatRequest, ChatResponse, Sender};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a warm, knowledgeable faith companion. \
Help the user explore scripture, answer questions about the Bible with care and accuracy, \
and offer gentle encouragement. Cite book, chapter and verse when quoting.";

/// Seam over the upstream language model so the router is testable without
/// a live service.
pub trait UpstreamModel: Send + Sync + 'static {
    fn respond(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse, String>>;
}

/// Client for an OpenAI-compatible `/v1/responses` endpoint.
///
/// The continuation token on the wire is the upstream response id; it is
/// passed straight through as `previous_response_id` so the upstream keeps
/// multi-turn context server-side.
pub struct LiveUpstream {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl LiveUpstream {
    pub fn new(
        base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| format!("invalid upstream url: {e}"))?;
        let endpoint = base
            .join("v1/responses")
            .map_err(|e| format!("invalid upstream url: {e}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("build http client: {e}"))?;
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
        })
    }
}

#[derive(Deserialize)]
struct ResponsesBody {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: String,
}

impl UpstreamModel for LiveUpstream {
    fn respond(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse, String>> {
        Box::pin(async move {
            let mut input: Vec<serde_json::Value> = request
                .message_history
                .iter()
                .map(|entry| {
                    let role = match entry.sender {
                        Sender::User => "user",
                        Sender::Assistant => "assistant",
                    };
                    json!({ "role": role, "content": entry.content })
                })
                .collect();
            input.push(json!({ "role": "user", "content": request.user_input }));

            let body = json!({
                "model": self.model,
                "instructions": self.system_prompt,
                "input": input,
                "previous_response_id": request.previous_response_id,
            });

            let res = self
                .http
                .post(self.endpoint.clone())
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("upstream request failed: {e}"))?;

            let status = res.status();
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(format!("upstream returned {status}: {body}"));
            }

            let body: ResponsesBody = res
                .json()
                .await
                .map_err(|e| format!("decode upstream response: {e}"))?;
            let text: String = body
                .output
                .iter()
                .flat_map(|item| item.content.iter())
                .map(|content| content.text.as_str())
                .collect();
            if text.is_empty() {
                return Err("upstream response carried no output text".to_string());
            }
            Ok(ChatResponse {
                response: text,
                response_id: body.id,
            })
        })
    }
}

#[derive(Clone)]
struct AppState {
    upstream: Arc<dyn UpstreamModel>,
}

/// Build the axum router for the completion endpoint.
///
/// Exposes `POST /api/chat` and `GET /health`.
pub fn build_router(upstream: Arc<dyn UpstreamModel>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { upstream })
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.user_input.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ChatErrorBody {
                error: "user_input must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    match state.upstream.respond(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!("upstream call failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(ChatErrorBody {
                    error: "the assistant is unreachable right now".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}
