//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents` | List documents |
//! | `POST` | `/documents` | Create and index a document (`{title, content}`) |
//! | `GET`  | `/documents/{id}` | One document |
//! | `DELETE` | `/documents/{id}` | Delete a document and its index entries |
//! | `GET`  | `/chats` | List chats with their messages |
//! | `POST` | `/chats` | Create a chat (`{title?}`) |
//! | `GET`  | `/chats/{id}` | One chat with its messages |
//! | `DELETE` | `/chats/{id}` | Delete a chat and its messages |
//! | `POST` | `/chats/{id}/send_message` | Ask a question (`{message}`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "chat not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embedding_error` (500), `generation_error` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser frontend
//! can be served from anywhere.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::generation::GenerationProvider;
use ragchat_core::models::{Chat, Document, Message};
use ragchat_core::orchestrator::{Orchestrator, SendMessageOutcome};
use ragchat_core::store::Store;
use ragchat_core::RagError;

use crate::app;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Starts the HTTP server with the configured model providers.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    run_server_with_providers(config, embedder, generator).await
}

/// Starts the HTTP server with caller-supplied model providers.
///
/// Used by tests and by embedders that bring their own model clients.
pub async fn run_server_with_providers(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
) -> anyhow::Result<()> {
    let orchestrator = app::open_with_providers(config, embedder, generator).await?;
    app::warm_index(&orchestrator).await?;

    let app = router(Arc::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "ragchat server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router over an existing orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list_documents).post(handle_create_document))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/chats", get(handle_list_chats).post(handle_create_chat))
        .route("/chats/{id}", get(handle_get_chat).delete(handle_delete_chat))
        .route("/chats/{id}/send_message", post(handle_send_message))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: &'static str,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
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
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RagError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "embedding_error"),
            RagError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "generation_error"),
            RagError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if !err.is_client_error() {
            error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    title: String,
    content: String,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<Document>>, AppError> {
    let docs = state
        .orchestrator
        .store()
        .list_documents()
        .await
        .map_err(RagError::from)?;
    Ok(Json(docs))
}

/// `201` with the stored document. If embedding fails the document is
/// still stored and the response is `500 embedding_error`.
async fn handle_create_document(
    State(state): State<AppState>,
    body: Result<Json<CreateDocumentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let Json(req) = body?;
    let doc = state
        .orchestrator
        .ingest_document(&req.title, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(state.orchestrator.get_document(&id).await?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Chats ============

/// A chat together with its messages in creation order.
#[derive(Serialize)]
struct ChatWithMessages {
    #[serde(flatten)]
    chat: Chat,
    messages: Vec<Message>,
}

#[derive(Deserialize, Default)]
struct CreateChatRequest {
    #[serde(default)]
    title: Option<String>,
}

async fn handle_list_chats(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatWithMessages>>, AppError> {
    let store = state.orchestrator.store();
    let chats = store.list_chats().await.map_err(RagError::from)?;
    let mut out = Vec::with_capacity(chats.len());
    for chat in chats {
        let messages = store.list_messages(&chat.id).await.map_err(RagError::from)?;
        out.push(ChatWithMessages { chat, messages });
    }
    Ok(Json(out))
}

/// The body is optional; an empty body creates a chat with the default
/// title.
async fn handle_create_chat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ChatWithMessages>), AppError> {
    let req: CreateChatRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateChatRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid JSON body: {}", e)))?
    };
    let chat = state.orchestrator.create_chat(req.title.as_deref()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ChatWithMessages {
            chat,
            messages: Vec::new(),
        }),
    ))
}

async fn handle_get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatWithMessages>, AppError> {
    let (chat, messages) = state.orchestrator.chat_with_messages(&id).await?;
    Ok(Json(ChatWithMessages { chat, messages }))
}

async fn handle_delete_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.delete_chat(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /chats/{id}/send_message ============

#[derive(Deserialize)]
struct SendMessageRequest {
    #[serde(default)]
    message: String,
}

/// Answer a message. Unknown chat → 404, blank message → 400, both
/// before anything is written. If no answer can be generated the user
/// message is removed again and the response is `500 generation_error`.
async fn handle_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageOutcome>, AppError> {
    // Unknown chat wins over a malformed body.
    let message = match body {
        Ok(Json(req)) => req.message,
        Err(rejection) => {
            state.orchestrator.chat_with_messages(&id).await?;
            return Err(rejection.into());
        }
    };
    let outcome = state.orchestrator.send_message(&id, &message).await?;
    Ok(Json(outcome))
}
