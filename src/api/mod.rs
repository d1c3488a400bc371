/// HTTP API Layer
///
/// This module provides the REST endpoints the orchestrator sits behind:
/// - Job submission (POST /api/tasks)
/// - Status lookup and listing
/// - Best-effort cancellation
/// - Health check

// Task submission, status and cancellation endpoints
pub mod tasks;

// Re-export router builder
pub use tasks::{create_task_routes, AppState};
