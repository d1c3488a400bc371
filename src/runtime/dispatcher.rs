/// Dispatcher entry point
///
/// Routes a picked-up job to the right execution path: single task when no
/// steps are declared, DAG when any step names an id or dependency,
/// sequential otherwise. Pipelines are validated before anything runs.

use crate::backend::registry;
use crate::error::OrchestratorError;
use crate::job::types::{is_dag_mode, Job, TaskRequest};
use crate::job::validate::validate_pipeline;
use crate::runtime::dag::execute_dag;
use crate::runtime::retry::execute_with_retry;
use crate::runtime::sequential::execute_sequential;
use crate::runtime::ProgressSender;
use serde_json::Value;

/// Execute a job to completion, returning its raw result
///
/// For pipelines the result is the serialized `PipelineResult`; for single
/// tasks it is the backend's raw result.
pub async fn dispatch(
    job: &Job,
    job_id: &str,
    progress: &ProgressSender,
) -> Result<Value, OrchestratorError> {
    match &job.steps {
        Some(steps) => {
            validate_pipeline(steps)?;

            let result = if is_dag_mode(steps) {
                tracing::info!("🧭 Job {} → DAG pipeline path", job_id);
                execute_dag(job, steps, job_id, progress).await?
            } else {
                tracing::info!("🧭 Job {} → sequential pipeline path", job_id);
                execute_sequential(job, steps, job_id, progress).await?
            };

            serde_json::to_value(result)
                .map_err(|e| OrchestratorError::Validation(e.to_string()))
        }
        None => {
            tracing::info!("🧭 Job {} → single-task path ({})", job_id, job.task_type);
            run_single_task(job).await
        }
    }
}

/// The single-task path
///
/// Kept as its own seam so a media-chunking hook can wrap it (split the
/// payload, run chunks, merge) without touching the dispatch contract.
async fn run_single_task(job: &Job) -> Result<Value, OrchestratorError> {
    let task = TaskRequest {
        id: uuid::Uuid::new_v4().to_string(),
        task_type: job.task_type.clone(),
        payload: job.payload.clone(),
        backend: job.backend.clone(),
        resources: job.resources.clone(),
    };

    let backend = registry::select(job.backend.as_deref()).await?;
    execute_with_retry(job.retry.as_ref(), || backend.execute(&task)).await
}
