//! HTTP and WebSocket transport
//!
//! Thin axum façade over a shared [`Orchestrator`]. Every structured result,
//! including error envelopes, is returned with 200; only requests that cannot
//! be understood get 400.
//!
//! # Endpoints
//!
//! - GET /health - Liveness probe
//! - GET /api/status - Agent status and provider health
//! - POST /api/task - Run one task `{task, worker_kind?}`
//! - POST /api/pipeline - Run the search → codegen → exec pipeline `{task}`
//! - GET /api/recall?query= - Semantic recall over memory
//! - GET /api/history?limit&offset - Memory log, newest first
//! - GET /api/executions?limit - In-process execution history
//! - GET /api/memories?limit - Raw semantic index listing
//! - DELETE /api/memory - Clear both memory stores
//! - GET /ws - Streaming task protocol

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Sink, SinkExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sdk::{EngineError, WorkerKind};

use crate::orchestrator::{ErrorEnvelope, Orchestrator, Reply};
use crate::workers::thinking_message;

const NO_TASK: &str = "no task provided";

/// Shared handler state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
struct RecallQuery {
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

#[derive(Debug, Deserialize)]
struct ExecutionsQuery {
    #[serde(default = "default_executions_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct MemoriesQuery {
    #[serde(default = "default_memories_limit")]
    limit: usize,
}

fn default_memories_limit() -> usize {
    100
}

fn default_history_limit() -> i64 {
    50
}

fn default_executions_limit() -> usize {
    20
}

/// Build the application router
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/task", post(task_handler))
        .route("/api/pipeline", post(pipeline_handler))
        .route("/api/recall", get(recall_handler))
        .route("/api/history", get(history_handler))
        .route("/api/executions", get(executions_handler))
        .route("/api/memories", get(memories_handler))
        .route("/api/memory", delete(clear_handler))
        .route("/ws", get(websocket_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `host:port` and serve until `shutdown` resolves
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| EngineError::Network(format!("Failed to bind to {}:{}: {}", host, port, e)))?;

    let addr = listener
        .local_addr()
        .map_err(|e| EngineError::Network(format!("Failed to get local address: {}", e)))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Server shutting down gracefully");
        })
        .await
        .map_err(|e| EngineError::Network(format!("Server error: {}", e)))
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Non-empty `task` field of a request body
fn task_field(payload: &Value) -> Option<&str> {
    payload
        .get("task")
        .and_then(|v| v.as_str())
        .filter(|task| !task.trim().is_empty())
}

fn status_error(e: EngineError) -> Json<Value> {
    tracing::warn!("Request failed: {}", e);
    Json(json!({ "status": "error", "message": e.to_string() }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.agent_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => status_error(e).into_response(),
    }
}

async fn task_handler(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Some(task) = task_field(&payload) else {
        return bad_request(NO_TASK);
    };
    let kind = match payload.get("worker_kind") {
        None | Some(Value::Null) => None,
        Some(Value::String(kind)) => Some(kind.as_str()),
        Some(_) => return bad_request("worker_kind must be a string"),
    };

    Json(state.orchestrator.execute_task_request(task, kind).await).into_response()
}

async fn pipeline_handler(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let Some(task) = task_field(&payload) else {
        return bad_request(NO_TASK);
    };

    Json(state.orchestrator.execute_pipeline_request(task).await).into_response()
}

async fn recall_handler(State(state): State<AppState>, Query(query): Query<RecallQuery>) -> Response {
    let Some(text) = query.query.filter(|q| !q.trim().is_empty()) else {
        return bad_request("no query provided");
    };

    match state.orchestrator.recall_context(&text).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => status_error(e).into_response(),
    }
}

async fn history_handler(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Response {
    match state
        .orchestrator
        .conversation_history(query.limit, query.offset)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => status_error(e).into_response(),
    }
}

async fn executions_handler(
    State(state): State<AppState>,
    Query(query): Query<ExecutionsQuery>,
) -> Response {
    Json(state.orchestrator.execution_history(query.limit)).into_response()
}

async fn memories_handler(
    State(state): State<AppState>,
    Query(query): Query<MemoriesQuery>,
) -> Response {
    match state.orchestrator.all_memories(query.limit).await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => status_error(e).into_response(),
    }
}

async fn clear_handler(State(state): State<AppState>) -> Response {
    Json(state.orchestrator.clear_memory().await).into_response()
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(mut socket: WebSocket, state: AppState) {
    tracing::info!("New WebSocket connection established");

    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                tracing::debug!("Received WebSocket message: {}", text);
                if let Err(e) = stream_task(&state.orchestrator, &text, &mut socket).await {
                    tracing::warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                tracing::info!("WebSocket connection closed by client");
                break;
            }
            Some(Err(e)) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            None => break,
            _ => {}
        }
    }

    tracing::info!("WebSocket connection closed");
}

/// Handle one streamed request: a `worker_thinking` event, then a
/// `worker_complete` event carrying the same payload as `POST /api/task`.
///
/// A request without a task gets a single error frame and the stream stays
/// open.
async fn stream_task<S>(orchestrator: &Orchestrator, text: &str, sink: &mut S) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    let payload: Value = serde_json::from_str(text).unwrap_or(Value::Null);
    let Some(task) = task_field(&payload) else {
        return send_json(sink, json!({ "error": NO_TASK })).await;
    };

    let requested = payload.get("worker_kind").and_then(|v| v.as_str());
    let kind = match requested.map(|k| k.parse::<WorkerKind>()).transpose() {
        Ok(kind) => kind.unwrap_or_else(|| orchestrator.route(task)),
        Err(e) => {
            let reply = Reply::<()>::Error(ErrorEnvelope::new(e.to_string(), task));
            return send_json(sink, json!({ "event": "worker_complete", "data": reply })).await;
        }
    };

    send_json(
        sink,
        json!({ "event": "worker_thinking", "message": thinking_message(kind, task) }),
    )
    .await?;

    let reply = Reply::from_result(orchestrator.execute_task(task, Some(kind)).await, task);
    send_json(sink, json!({ "event": "worker_complete", "data": reply })).await
}

async fn send_json<S>(sink: &mut S, value: Value) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    sink.send(Message::Text(value.to_string())).await
}
