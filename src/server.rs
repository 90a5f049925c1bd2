//! Chat HTTP server over the deployed knowledge base.
//!
//! Thin front end for Bedrock's RetrieveAndGenerate: the browser sends a
//! question, the service retrieves from the knowledge base and answers with
//! the configured generation model. The knowledge base id comes from the
//! deployed stack's outputs unless pinned in `[server].knowledge_base_id`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Ask a question; returns the grounded answer |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a static frontend can
//! call the API from anywhere during development.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::bedrock::BedrockAgentClient;
use crate::cloudformation::{CloudFormationClient, StackEngine};
use crate::config::Config;
use crate::stack;

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
struct AppState {
    client: Arc<BedrockAgentClient>,
    knowledge_base_id: Arc<String>,
    generation_model_arn: Arc<String>,
}

/// Starts the chat server.
///
/// Resolves the knowledge base id once at startup (config override first,
/// deployed stack outputs otherwise), binds to `[server].bind`, and serves
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let generation_model_arn = match &config.server.generation_model_arn {
        Some(arn) => arn.clone(),
        None => anyhow::bail!(
            "server.generation_model_arn is not set; pick the model answers \
             are generated with"
        ),
    };
    let knowledge_base_id = resolve_knowledge_base_id(config).await?;

    let state = AppState {
        client: Arc::new(BedrockAgentClient::from_env(&config.stack.region)?),
        knowledge_base_id: Arc::new(knowledge_base_id),
        generation_model_arn: Arc::new(generation_model_arn),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state.clone());

    println!(
        "Chat server listening on http://{} (knowledge base {})",
        config.server.bind, state.knowledge_base_id
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Config override first; otherwise the `KnowledgeBaseId` output of the
/// deployed stack.
async fn resolve_knowledge_base_id(config: &Config) -> anyhow::Result<String> {
    if let Some(id) = &config.server.knowledge_base_id {
        return Ok(id.clone());
    }
    let engine = CloudFormationClient::from_env(&config.stack.region)?;
    let description = match engine.describe_stack(&config.stack.name).await? {
        Some(description) => description,
        None => anyhow::bail!(
            "stack {} is not deployed; run `kbstack deploy` first or set \
             server.knowledge_base_id",
            config.stack.name
        ),
    };
    match description.output(stack::OUTPUT_KNOWLEDGE_BASE_ID) {
        Some(id) => Ok(id.to_string()),
        None => anyhow::bail!(
            "stack {} reports no {} output yet (status {}); wait for the \
             deployment to finish",
            config.stack.name,
            stack::OUTPUT_KNOWLEDGE_BASE_ID,
            description.status
        ),
    }
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// 502 for failures coming back from the retrieval/generation service.
fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
    }
}

/// Maps RetrieveAndGenerate failures onto the error contract. Requests the
/// service itself rejects as malformed (bad session id, oversized input)
/// are the client's fault; everything else is upstream.
fn classify_chat_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("ValidationException") {
        bad_request(msg)
    } else {
        upstream_error(msg)
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
    /// Session id from a previous response, to continue a conversation.
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// Handler for `POST /chat`.
///
/// Validates the query, retrieves and generates against the knowledge base,
/// and returns the answer plus the service session id for follow-ups.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let answer = state
        .client
        .retrieve_and_generate(
            &state.knowledge_base_id,
            &state.generation_model_arn,
            &request.query,
            request.session_id.as_deref(),
        )
        .await
        .map_err(classify_chat_error)?;

    Ok(Json(ChatResponse {
        response: answer.output.text,
        session_id: answer.session_id,
    }))
}
