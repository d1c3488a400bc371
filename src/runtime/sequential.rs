/// Sequential executor for pipelines without named steps
///
/// The legacy path: steps run strictly in declaration order, and each result
/// is exposed to later templates by numeric index (`steps.0.field`) and by
/// the generated `step_<i>` alias. Retry, optional handling and event
/// emission behave exactly as in DAG mode; there are no parallel groups.

use crate::error::OrchestratorError;
use crate::job::types::{Job, JobContext, PipelineResult, Step, StepStatus};
use crate::runtime::step::run_step;
use crate::runtime::ProgressSender;
use serde_json::{Map, Value};
use std::time::Instant;

/// Execute a pipeline in sequential mode
pub async fn execute_sequential(
    job: &Job,
    steps: &[Step],
    job_id: &str,
    progress: &ProgressSender,
) -> Result<PipelineResult, OrchestratorError> {
    let started = Instant::now();
    let total = steps.len();

    tracing::info!("➡️ Sequential pipeline with {} steps", total);

    let mut ctx = JobContext::new(job.payload.clone());
    let mut statuses: Vec<StepStatus> = Vec::with_capacity(total);
    let mut ordered: Vec<Value> = Vec::with_capacity(total);
    let mut step_results = Map::new();

    for (i, step) in steps.iter().enumerate() {
        let _ = progress.send(((i * 100) / total) as u8);

        let id = step.effective_id(i);
        let outcome = run_step(job, step, &id, job_id, &ctx).await;

        if let Some(failure) = outcome.failure {
            return Err(failure);
        }

        let result = outcome.context_result();
        ctx.add_step_result(&id, i, result.clone());
        step_results.insert(id, result.clone());
        ordered.push(result);
        statuses.push(outcome.status);
    }

    let final_result = ordered.last().cloned().unwrap_or(Value::Null);

    Ok(PipelineResult {
        steps: ordered,
        step_results,
        step_status: statuses,
        final_result,
        total_duration: started.elapsed().as_millis() as u64,
        parallel_groups: Vec::new(),
    })
}
