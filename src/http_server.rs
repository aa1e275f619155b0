//! HTTP server implementation using Axum.
//!
//! The surface the playground frontend talks to: heartbeat tracking, the
//! file tree and file content for the explorer/editor, and the prompt
//! endpoint that drives the agent. Every recoverable failure is converted
//! to a structured JSON response here; nothing unwinds past a handler.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::Error;
use crate::files::{self, FileNode};
use crate::state::AppState;

// Request/Response types

#[derive(Deserialize)]
struct HeartbeatRequest {
    action: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatResponse {
    success: bool,
    last_activity: u64,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatStatus {
    success: bool,
    last_activity: u64,
    time_since_last_activity: u64,
    is_active: bool,
    is_restarting: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    success: bool,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilesResponse {
    success: bool,
    files: Vec<FileNode>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileContentResponse {
    success: bool,
    content: String,
    language: &'static str,
    path: String,
}

#[derive(Deserialize)]
struct PromptRequest {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptResponse {
    success: bool,
    response: String,
    sandbox_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    success: bool,
    error: String,
}

type ErrorReply = (StatusCode, Json<ApiError>);

fn error_reply(err: Error) -> ErrorReply {
    let status = match &err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::IsDirectory { .. } | Error::InvalidPath { .. } => StatusCode::BAD_REQUEST,
        Error::RestartTimeout => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            success: false,
            error: err.to_string(),
        }),
    )
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/sandbox/heartbeat",
            post(record_heartbeat)
                .get(heartbeat_status)
                .delete(clear_heartbeat_timer),
        )
        .route("/api/files", get(list_files))
        .route("/api/files/*path", get(read_file))
        .route("/api/prompt", post(run_prompt).delete(cleanup_sandbox))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "OK"
}

async fn record_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    let last_activity = state.lifecycle.record_heartbeat(&req.action);
    info!(action = %req.action, "heartbeat received");
    Json(HeartbeatResponse {
        success: true,
        last_activity,
        message: "Heartbeat recorded",
    })
}

async fn heartbeat_status(State(state): State<AppState>) -> Json<HeartbeatStatus> {
    let lifecycle = &state.lifecycle;
    Json(HeartbeatStatus {
        success: true,
        last_activity: lifecycle.last_activity_ms(),
        time_since_last_activity: lifecycle.time_since_last_activity().as_millis() as u64,
        is_active: lifecycle.is_active(),
        is_restarting: lifecycle.is_restarting(),
    })
}

async fn clear_heartbeat_timer(State(state): State<AppState>) -> Json<MessageResponse> {
    state.lifecycle.clear_timer();
    info!("heartbeat timer cleared");
    Json(MessageResponse {
        success: true,
        message: "Heartbeat timer cleared",
    })
}

async fn list_files(State(state): State<AppState>) -> Result<Json<FilesResponse>, ErrorReply> {
    state.lifecycle.record_activity("files_list");
    let handle = state.lifecycle.get_or_create().await.map_err(error_reply)?;
    let files = files::build_tree(state.lifecycle.provisioner().as_ref(), &handle)
        .await
        .map_err(error_reply)?;
    Ok(Json(FilesResponse {
        success: true,
        files,
    }))
}

async fn read_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<FileContentResponse>, ErrorReply> {
    state.lifecycle.record_activity("file_read");
    let handle = state.lifecycle.get_or_create().await.map_err(error_reply)?;
    let file = files::read_file(state.lifecycle.provisioner().as_ref(), &handle, &path)
        .await
        .map_err(error_reply)?;
    Ok(Json(FileContentResponse {
        success: true,
        content: file.content,
        language: file.language,
        path: file.path,
    }))
}

async fn run_prompt(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<PromptResponse>, ErrorReply> {
    if req.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                success: false,
                error: "Message is required".to_string(),
            }),
        ));
    }
    if !state.llm_configured {
        return Err(error_reply(Error::MissingConfig {
            name: "LLM_API_KEY".to_string(),
        }));
    }

    let request_id = Uuid::new_v4();
    info!(%request_id, "prompt received");
    state.lifecycle.record_activity("prompt");
    let sandbox_url = state.lifecycle.host_url().await.map_err(error_reply)?;

    match state.agent.run(&state.lifecycle, &req.message).await {
        Ok(response) => Ok(Json(PromptResponse {
            success: true,
            response,
            sandbox_url,
        })),
        Err(err) => {
            error!(%request_id, error = %err, "prompt failed, cleaning up sandbox");
            state.lifecycle.cleanup().await;
            Err(error_reply(err))
        }
    }
}

async fn cleanup_sandbox(State(state): State<AppState>) -> Json<MessageResponse> {
    state.lifecycle.cleanup().await;
    Json(MessageResponse {
        success: true,
        message: "Sandbox cleaned up successfully",
    })
}
