use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_stream::Stream;

use toolgate_core::engine::RunOptions;
use toolgate_core::error::BrokerError;
use toolgate_core::task::{Task, WorkflowStep};
use toolgate_core::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/{task_id}", get(get_task))
        .route("/{task_id}/run", post(run_task))
        .route("/{task_id}/stream", get(stream_task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksQuery {
    owner_id: Option<String>,
}

/// GET /api/tasks — List tasks for an owner.
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let owner = query.owner_id.as_deref().unwrap_or("default");
    let tasks = state.task_store.list_by_owner(owner).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    owner_id: String,
    workflow: Vec<WorkflowStep>,
}

/// POST /api/tasks — Submit a task with its workflow.
async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let task = Task::new(&body.owner_id, body.workflow);
    state.task_store.save_task(&task).await?;
    Ok(Json(serde_json::json!({ "task": task })))
}

/// GET /api/tasks/{task_id}
async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    use toolgate_core::store::TaskStore;
    let task = state
        .task_store
        .get_task(&task_id)
        .await?
        .ok_or_else(|| BrokerError::NotFound(format!("Task {}", task_id)))?;
    Ok(Json(serde_json::json!({ "task": task })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RunQuery {
    #[serde(default)]
    skip_auth_check: bool,
}

/// POST /api/tasks/{task_id}/run — Run to completion, return the result.
async fn run_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let options = RunOptions {
        skip_auth_check: query.skip_auth_check,
        ..RunOptions::default()
    };
    let result = state.engine.run(&task_id, options).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

/// GET /api/tasks/{task_id}/stream — Run with progress streamed as SSE.
///
/// Events carry the engine's `{event, data}` schema in emission order.
async fn stream_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<RunQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) =
        tokio::sync::mpsc::unbounded_channel::<toolgate_core::engine::ProgressEvent>();
    let engine = state.engine.clone();
    let options = RunOptions {
        skip_auth_check: query.skip_auth_check,
        ..RunOptions::default()
    };

    tokio::spawn(async move {
        if let Err(e) = engine.run_streaming(&task_id, options, &tx).await {
            tracing::warn!("[api] Streaming run for {} failed: {}", task_id, e);
        }
        // tx drops here, ending the stream
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().event(event.name()).json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => tracing::warn!("[api] Failed to encode progress event: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
