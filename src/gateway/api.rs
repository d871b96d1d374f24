//! REST and SSE handlers for the chat front end.

use super::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;

use crate::providers::ChatMessage;
use crate::routing::RouteDecision;
use crate::workflow::{AgentOutcome, WorkflowError, WorkflowEvent, WorkflowInput};

type ApiError = (StatusCode, Json<serde_json::Value>);

pub(super) fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

fn workflow_error(error: &WorkflowError) -> ApiError {
    let status = match error {
        WorkflowError::EmptyInput => StatusCode::BAD_REQUEST,
        WorkflowError::MissingAgent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        WorkflowError::Upstream { .. } => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
        tracing::error!("Chat request failed: {error}");
    }
    error_response(status, error.to_string())
}

// ── Request / response bodies ───────────────────────────────────

/// Body of `POST /api/chat` and `POST /api/chat/stream`.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ChatBody {
    /// The last message becomes the workflow input; earlier ones are client history.
    fn into_input(mut self) -> Result<WorkflowInput, ApiError> {
        let Some(last) = self.messages.pop() else {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "messages must not be empty",
            ));
        };
        if last.content.trim().is_empty() {
            return Err(workflow_error(&WorkflowError::EmptyInput));
        }
        Ok(WorkflowInput {
            input: last.content,
            messages: self.messages,
            thread_id: self.thread_id,
        })
    }
}

fn parse_body(body: Result<Json<ChatBody>, JsonRejection>) -> Result<WorkflowInput, ApiError> {
    match body {
        Ok(Json(body)) => body.into_input(),
        Err(rejection) => {
            let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            Err(error_response(status, rejection.body_text()))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub outputs: Vec<AgentOutcome>,
    pub decision: RouteDecision,
    #[serde(rename = "combinedOutputs")]
    pub combined_outputs: String,
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /api/chat: run the workflow and answer once it completes
pub async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let input = parse_body(body)?;
    let result = state
        .workflow
        .invoke(input)
        .await
        .map_err(|e| workflow_error(&e))?;

    Ok(Json(ChatReply {
        outputs: result.outputs,
        decision: result.decision,
        combined_outputs: result.combined_output,
    }))
}

fn sse_event(event: &WorkflowEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("encode failed: {e}") })
            .to_string()
    });
    Event::default().event(event.name()).data(data)
}

fn event_stream(
    rx: mpsc::UnboundedReceiver<WorkflowEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_event(&event)), rx))
    })
}

/// POST /api/chat/stream: one SSE event per completed workflow step
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let input = parse_body(body)?;
    let (tx, rx) = mpsc::unbounded_channel();

    let workflow = state.workflow.clone();
    tokio::spawn(async move {
        if let Err(e) = workflow.stream(input, tx).await {
            tracing::warn!("Streaming chat ended with error: {e}");
        }
    });

    Ok(Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()))
}

/// GET /api/agents: agents with their bound tools
pub async fn handle_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents: Vec<serde_json::Value> = state
        .workflow
        .agents()
        .map(|agent| {
            serde_json::json!({
                "id": agent.id(),
                "model": agent.model(),
                "tools": agent.tool_specs(),
            })
        })
        .collect();

    Json(serde_json::json!({ "agents": agents }))
}

/// GET /api/sessions/{thread_id}: stored transcripts for one thread
pub async fn handle_session_get(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Response {
    let thread_id = thread_id.trim();
    match state.workflow.thread_transcripts(thread_id).await {
        Ok(transcripts) if transcripts.is_empty() => {
            error_response(StatusCode::NOT_FOUND, format!("unknown thread: {thread_id}"))
                .into_response()
        }
        Ok(transcripts) => {
            let agents: Vec<serde_json::Value> = transcripts
                .into_iter()
                .map(|(agent, messages)| serde_json::json!({ "agent": agent, "messages": messages }))
                .collect();
            Json(serde_json::json!({ "thread_id": thread_id, "agents": agents })).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Session lookup failed: {e}"),
        )
        .into_response(),
    }
}

/// DELETE /api/sessions/{thread_id}: forget a thread
pub async fn handle_session_delete(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Response {
    let thread_id = thread_id.trim();
    match state.workflow.forget_thread(thread_id).await {
        Ok(removed) => {
            Json(serde_json::json!({ "thread_id": thread_id, "removed": removed })).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Session delete failed: {e}"),
        )
        .into_response(),
    }
}

/// GET /health
pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
