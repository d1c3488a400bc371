/// DAG scheduler for pipelines with named steps
///
/// Operates on the step map keyed by effective id. Each iteration computes
/// the runnable set (pending steps whose dependencies have all resolved),
/// launches the whole set concurrently, and awaits it as a group before
/// scheduling again. Skipped steps satisfy their dependents exactly like
/// completed ones; the first non-optional failure aborts the pipeline after
/// its group has been fully awaited. An iteration that finds nothing
/// runnable while pending steps remain is a deadlock.

use crate::error::OrchestratorError;
use crate::job::types::{
    effective_ids, Job, JobContext, PipelineResult, Step, StepState, StepStatus,
};
use crate::runtime::step::run_step;
use crate::runtime::ProgressSender;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::time::Instant;

/// Execute a pipeline in DAG mode
pub async fn execute_dag(
    job: &Job,
    steps: &[Step],
    job_id: &str,
    progress: &ProgressSender,
) -> Result<PipelineResult, OrchestratorError> {
    let started = Instant::now();
    let ids = effective_ids(steps);
    let total = steps.len();

    tracing::info!("🗺️ DAG pipeline with {} steps: {:?}", total, ids);

    let mut statuses: Vec<StepStatus> = steps
        .iter()
        .zip(&ids)
        .map(|(step, id)| StepStatus::pending(id, &step.task))
        .collect();
    let mut ctx = JobContext::new(job.payload.clone());
    let mut parallel_groups: Vec<Vec<String>> = Vec::new();

    loop {
        if statuses.iter().all(|s| s.status.is_terminal()) {
            break;
        }

        let runnable: Vec<usize> = (0..total)
            .filter(|&i| {
                statuses[i].status == StepState::Pending
                    && steps[i].depends_on.iter().all(|dep| {
                        statuses
                            .iter()
                            .any(|s| s.id == *dep && s.status.satisfies_dependents())
                    })
            })
            .collect();

        if runnable.is_empty() {
            let pending: Vec<String> = statuses
                .iter()
                .filter(|s| s.status == StepState::Pending)
                .map(|s| s.id.clone())
                .collect();
            tracing::error!("💀 Pipeline deadlocked, pending steps: {:?}", pending);
            return Err(OrchestratorError::Deadlock(pending));
        }

        for &i in &runnable {
            statuses[i].status = StepState::Running;
        }

        let group: Vec<String> = runnable.iter().map(|&i| ids[i].clone()).collect();
        tracing::info!("🚀 Launching parallel group: {:?}", group);
        if group.len() > 1 {
            parallel_groups.push(group.clone());
        }

        let futures = runnable.iter().map(|&i| {
            let id = ids[i].clone();
            let ctx_ref = &ctx;
            async move { (i, run_step(job, &steps[i], &id, job_id, ctx_ref).await) }
        });

        // Every step in the group is awaited before failure propagates;
        // the first failure by declaration order wins
        let outcomes = join_all(futures).await;
        let mut group_failure: Option<OrchestratorError> = None;
        for (i, outcome) in outcomes {
            if outcome.status.status.satisfies_dependents() {
                ctx.add_step_result(&ids[i], i, outcome.context_result());
            }
            if group_failure.is_none() {
                group_failure = outcome.failure;
            }
            statuses[i] = outcome.status;
        }

        let resolved = statuses
            .iter()
            .filter(|s| s.status.satisfies_dependents())
            .count();
        let _ = progress.send(((resolved * 100) / total) as u8);

        if let Some(failure) = group_failure {
            return Err(failure);
        }
    }

    let mut step_results = Map::new();
    let mut ordered = Vec::with_capacity(total);
    for status in &statuses {
        let result = status.result.clone().unwrap_or(Value::Null);
        step_results.insert(status.id.clone(), result.clone());
        ordered.push(result);
    }
    let final_result = ordered.last().cloned().unwrap_or(Value::Null);

    Ok(PipelineResult {
        steps: ordered,
        step_results,
        step_status: statuses,
        final_result,
        total_duration: started.elapsed().as_millis() as u64,
        parallel_groups,
    })
}
