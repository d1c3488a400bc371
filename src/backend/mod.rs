/// Backend Adapter Layer
///
/// Backends forward resolved tasks to remote compute services. The core only
/// sees this small contract:
/// - `execute` a task and return its raw result
/// - `get_status` of a remote execution
/// - `is_healthy` liveness probe (bounded at 5 seconds by the selector)
/// - optional `get_resources` advertisement and `cancel`

// Process-wide registry and selection rules
pub mod registry;

// HTTP adapter for Modal/Ray-shaped compute services
pub mod http;

use crate::error::OrchestratorError;
use crate::job::types::{ResourcePool, TaskRequest, TaskResult};
use async_trait::async_trait;
use serde_json::Value;

/// Contract every backend adapter implements
///
/// Adapters classify their own failures: a transport error or error body
/// becomes `BackendExecution`, which the retry executor treats uniformly.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registered adapter name (e.g. "modal", "ray")
    fn name(&self) -> &str;

    /// Forward one resolved task to the remote service and return its raw
    /// result. Must fail with a typed error carrying the remote message on
    /// non-2xx or when the response body signals an error.
    async fn execute(&self, task: &TaskRequest) -> Result<Value, OrchestratorError>;

    /// Retrieve remote execution state for a task id
    async fn get_status(&self, task_id: &str) -> Result<TaskResult, OrchestratorError>;

    /// Lightweight liveness probe
    async fn is_healthy(&self) -> bool;

    /// Advertised capacity, when the backend reports it
    async fn get_resources(&self) -> Option<ResourcePool> {
        None
    }

    /// Best-effort remote cancellation; returns whether the backend accepted
    /// the request
    async fn cancel(&self, _task_id: &str) -> bool {
        false
    }
}

pub use http::HttpBackend;
pub use registry::{clear, register, select, BackendRegistry};
