/// Task submission and status REST endpoints
///
/// The thin HTTP façade over the queue: submit a job, look up or list
/// statuses, and request cancellation. Handlers validate shape, translate
/// to queue operations, and map failures to status codes — 400 for
/// malformed bodies, 404 for unknown jobs, 500 for broker trouble.

use crate::job::types::{Job, JobStatus, QueueLane};
use crate::queue::JobQueue;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared state for the task endpoints
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
}

/// Create the task management routes
pub fn create_task_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", post(submit_task))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}", delete(cancel_task))
}

/// Optional lane narrowing for lookups
#[derive(Debug, Deserialize)]
struct LaneQuery {
    queue: Option<String>,
}

/// Listing filters
#[derive(Debug, Deserialize)]
struct ListQuery {
    queue: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

/// Submit a job
///
/// POST /api/tasks
/// Body: a Job document; `type` and `payload` are required
/// Returns: { "taskId": "...", "status": "queued", "queue": "default" }
async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    // Validate the two required fields before deserializing the whole shape
    // so the caller gets a pointed message
    let has_type = body.get("type").and_then(|v| v.as_str()).is_some();
    let has_payload = body.get("payload").is_some();
    if !has_type || !has_payload {
        return Err(bad_request("job requires 'type' and 'payload'"));
    }

    let job: Job = serde_json::from_value(body)
        .map_err(|e| bad_request(&format!("invalid job document: {e}")))?;

    let lane = job.queue;
    match state.queue.enqueue(job).await {
        Ok(id) => Ok(Json(json!({
            "taskId": id,
            "status": "queued",
            "queue": lane.as_str(),
        }))),
        Err(e) if matches!(e, crate::error::OrchestratorError::Validation(_)) => {
            Err(bad_request(&e.to_string()))
        }
        Err(e) => {
            tracing::error!("❌ Failed to enqueue job: {}", e);
            Err(internal_error(&e.to_string()))
        }
    }
}

/// Look up a job's status
///
/// GET /api/tasks/{id}?queue=
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LaneQuery>,
) -> Result<Json<Value>, StatusCode> {
    let lane = params.queue.as_deref().map(QueueLane::parse);
    match state.queue.status(&id, lane).await {
        Ok(Some(record)) => Ok(Json(
            serde_json::to_value(record).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        )),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("❌ Status lookup failed for {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// List jobs in a lane
///
/// GET /api/tasks?queue=&status=&limit=   (default limit: 50)
async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Value>, StatusCode> {
    let lane = QueueLane::parse(params.queue.as_deref().unwrap_or("default"));
    let limit = params.limit.unwrap_or(50);
    let status = match params.status.as_deref() {
        None => None,
        Some("pending") => Some(JobStatus::Pending),
        Some("running") => Some(JobStatus::Running),
        Some("completed") => Some(JobStatus::Completed),
        Some("failed") => Some(JobStatus::Failed),
        Some(_) => return Err(StatusCode::BAD_REQUEST),
    };

    match state.queue.list(lane, status, limit).await {
        Ok(records) => Ok(Json(json!({ "tasks": records }))),
        Err(e) => {
            tracing::error!("❌ Listing failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Request best-effort cancellation
///
/// DELETE /api/tasks/{id}?queue=
/// 404 when the job is unknown, 400 when it already reached a terminal state
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LaneQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let lane = params.queue.as_deref().map(QueueLane::parse);

    let existing = state
        .queue
        .status(&id, lane)
        .await
        .map_err(|e| internal_error(&e.to_string()))?;
    let Some(record) = existing else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown task"})),
        ));
    };
    if matches!(record.status, JobStatus::Completed | JobStatus::Failed) {
        return Err(bad_request("task already finished"));
    }

    match state.queue.cancel(&id, lane).await {
        Ok(true) => Ok(Json(json!({"message": "cancel requested", "taskId": id}))),
        Ok(false) => Err(bad_request("task already finished")),
        Err(e) => Err(internal_error(&e.to_string())),
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

fn internal_error(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message})),
    )
}
