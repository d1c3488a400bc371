/// Single step execution
///
/// Runs one pipeline step end to end: resolve the input templates, fan out
/// over `forEach` in bounded batches when present, pick a backend, execute
/// under the step's retry policy, and classify the outcome. Optional steps
/// absorb failure as a skip so downstream steps still run; everything else
/// hands the failure back to the scheduler.

use crate::backend::registry;
use crate::error::OrchestratorError;
use crate::job::template::{resolve_map, resolve_value};
use crate::job::types::{Job, JobContext, Step, StepState, StepStatus, TaskRequest};
use crate::runtime::events::{self, StepEvent};
use crate::runtime::retry::execute_with_retry;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use std::time::Instant;

/// Result of running one step
#[derive(Debug)]
pub struct StepOutcome {
    /// Final status snapshot, including the result for completed and skipped
    /// steps
    pub status: StepStatus,
    /// Set when a non-optional step failed; the scheduler aborts the
    /// pipeline with this error
    pub failure: Option<OrchestratorError>,
}

impl StepOutcome {
    /// The value downstream steps see through the context
    pub fn context_result(&self) -> Value {
        self.status.result.clone().unwrap_or(Value::Null)
    }
}

/// Execute one step against the current context
pub async fn run_step(
    job: &Job,
    step: &Step,
    step_id: &str,
    job_id: &str,
    ctx: &JobContext,
) -> StepOutcome {
    let started_at = Utc::now();
    let timer = Instant::now();
    events::emit(StepEvent::start(job_id, step_id, &step.task));

    let execution = execute_step_body(job, step, ctx).await;
    let completed_at = Utc::now();
    let duration = timer.elapsed().as_millis() as u64;

    let mut status = StepStatus {
        id: step_id.to_string(),
        task: step.task.clone(),
        status: StepState::Running,
        started_at: Some(started_at),
        completed_at: Some(completed_at),
        duration: Some(duration),
        error: None,
        result: None,
    };

    match execution {
        Ok(result) => {
            status.status = StepState::Completed;
            status.result = Some(result);
            events::emit(StepEvent::complete(job_id, step_id, &step.task, duration));
            StepOutcome {
                status,
                failure: None,
            }
        }
        Err(error) => {
            let message = error.to_string();
            events::emit(StepEvent::error(
                job_id,
                step_id,
                &step.task,
                duration,
                &message,
                step.optional,
            ));

            if step.optional {
                status.status = StepState::Skipped;
                status.error = Some(message.clone());
                status.result = Some(json!({"skipped": true, "error": message}));
                StepOutcome {
                    status,
                    failure: None,
                }
            } else {
                status.status = StepState::Failed;
                status.error = Some(message.clone());
                StepOutcome {
                    status,
                    failure: Some(OrchestratorError::StepFailed {
                        step: step_id.to_string(),
                        message,
                    }),
                }
            }
        }
    }
}

/// The step body: forEach fan-out or a single child task
async fn execute_step_body(
    job: &Job,
    step: &Step,
    ctx: &JobContext,
) -> Result<Value, OrchestratorError> {
    match &step.for_each {
        Some(template) => execute_for_each(job, step, template, ctx).await,
        None => execute_single(job, step, ctx).await,
    }
}

/// Fan out over a resolved sequence with bounded batches
///
/// Batch size is `forEachConcurrency` (defaulting to the sequence length);
/// batches run in declaration order and items inside a batch are joined
/// together, so observed concurrency never exceeds the cap and the result
/// sequence preserves item order.
async fn execute_for_each(
    job: &Job,
    step: &Step,
    template: &str,
    ctx: &JobContext,
) -> Result<Value, OrchestratorError> {
    let resolved = resolve_value(&Value::String(template.to_string()), ctx)
        .ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "forEach template '{template}' did not resolve"
            ))
        })?;

    let items = match resolved {
        Value::Array(items) => items,
        other => {
            return Err(OrchestratorError::Validation(format!(
                "forEach template '{template}' resolved to {}, expected a sequence",
                value_kind(&other)
            )))
        }
    };

    if items.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let batch_size = step
        .for_each_concurrency
        .unwrap_or(items.len())
        .max(1);

    tracing::debug!(
        "🔀 forEach over {} items in batches of {}",
        items.len(),
        batch_size
    );

    let mut results = Vec::with_capacity(items.len());
    for (batch_index, batch) in items.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        let futures = batch.iter().enumerate().map(|(i, item)| {
            let item_ctx = ctx.with_item(item.clone(), offset + i);
            async move { execute_single(job, step, &item_ctx).await }
        });

        for outcome in join_all(futures).await {
            results.push(outcome?);
        }
    }

    Ok(Value::Array(results))
}

/// Resolve the input once, build the child task, and execute it under retry
///
/// Backend selection happens before the retry loop: an unavailable backend
/// fails the job outright instead of burning the step's attempts.
async fn execute_single(
    job: &Job,
    step: &Step,
    ctx: &JobContext,
) -> Result<Value, OrchestratorError> {
    let payload = Value::Object(resolve_map(&step.input, ctx));

    let task = TaskRequest {
        id: uuid::Uuid::new_v4().to_string(),
        task_type: step.task.clone(),
        payload,
        backend: job.backend.clone(),
        resources: step.resources.clone().or_else(|| job.resources.clone()),
    };

    let backend = registry::select(job.backend.as_deref()).await?;
    let policy = step.retry.as_ref().or(job.retry.as_ref());

    execute_with_retry(policy, || backend.execute(&task)).await
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
