/// Worker pools over the queue lanes
///
/// Each lane gets an independent pool of polling workers. A worker claims a
/// job, zeroes its progress, forwards progress ticks (broker update plus
/// `onProgress` effects), runs the dispatcher, and settles the outcome:
/// success records the result and fires `onSuccess`; failure fires `onError`
/// first and then reports to the broker, which may schedule another outer
/// attempt. Cancellation is best-effort — a cancel-requested job caught at
/// claim time is failed terminally without touching a backend.

use crate::job::types::{EffectContext, QueueLane};
use crate::queue::broker::{BrokerJob, RetryDisposition};
use crate::queue::JobQueue;
use crate::runtime::dispatcher::dispatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long an idle worker sleeps between claim polls
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-lane worker counts
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Workers for the default and cpu lanes
    pub concurrency: usize,
    /// Workers for the gpu lane (typically smaller)
    pub gpu_concurrency: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            gpu_concurrency: 2,
        }
    }
}

/// Running worker pools across all three lanes
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the per-lane worker loops
    pub fn start(queue: Arc<JobQueue>, config: WorkerPoolConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();

        for lane in QueueLane::all() {
            let count = match lane {
                QueueLane::Gpu => config.gpu_concurrency,
                _ => config.concurrency,
            };
            for n in 0..count {
                let queue = queue.clone();
                let rx = shutdown.subscribe();
                handles.push(tokio::spawn(worker_loop(queue, lane, n, rx)));
            }
        }

        tracing::info!(
            "👷 Worker pools started ({} default/cpu, {} gpu per lane)",
            config.concurrency,
            config.gpu_concurrency
        );
        Self { shutdown, handles }
    }

    /// Signal every worker and wait for in-flight jobs to settle
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("👷 Worker pools stopped");
    }
}

async fn worker_loop(
    queue: Arc<JobQueue>,
    lane: QueueLane,
    worker_n: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("👷 Worker {}#{} started", lane, worker_n);

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.broker().claim_next(lane).await {
            Ok(Some(job)) => {
                process_job(&queue, job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                tracing::error!("❌ Worker {}#{} failed to claim: {}", lane, worker_n, e);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    tracing::debug!("👷 Worker {}#{} stopped", lane, worker_n);
}

/// Run one claimed job through the dispatcher and settle its state
async fn process_job(queue: &Arc<JobQueue>, claimed: BrokerJob) {
    let job_id = claimed.id.clone();
    let job = claimed.job.clone();
    tracing::info!(
        "⚙️ Processing job {} ({}) attempt {}/{}",
        job_id,
        job.task_type,
        claimed.attempts_made,
        claimed.options.attempts
    );

    if claimed.cancel_requested {
        tracing::info!("🛑 Job {} cancelled before execution", job_id);
        settle_failure(queue, &claimed, "cancelled before execution", true).await;
        return;
    }

    if let Err(e) = queue.broker().set_progress(&job_id, 0).await {
        tracing::warn!("⚠️ Failed to zero progress for {}: {}", job_id, e);
    }

    // Progress ticks fan out to the broker and onProgress effects without
    // blocking the executor
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u8>();
    let progress_task = {
        let queue = queue.clone();
        let job = job.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            while let Some(pct) = progress_rx.recv().await {
                if let Err(e) = queue.broker().set_progress(&job_id, pct).await {
                    tracing::warn!("⚠️ Progress update failed for {}: {}", job_id, e);
                }
                if let Some(effects) = queue.effects() {
                    let mut ctx = EffectContext::new(&job_id, &job);
                    ctx.progress = Some(pct);
                    effects.run_effects(&job.on_progress, &ctx).await;
                }
            }
        })
    };

    let outcome = dispatch(&job, &job_id, &progress_tx).await;
    drop(progress_tx);
    let _ = progress_task.await;

    match outcome {
        Ok(result) => {
            if let Err(e) = queue.broker().set_progress(&job_id, 100).await {
                tracing::warn!("⚠️ Final progress update failed for {}: {}", job_id, e);
            }
            if let Some(effects) = queue.effects() {
                let mut ctx = EffectContext::new(&job_id, &job);
                ctx.result = Some(result.clone());
                effects.run_effects(&job.on_success, &ctx).await;
            }
            if let Err(e) = queue.broker().complete(&job_id, result).await {
                tracing::error!("❌ Failed to record completion of {}: {}", job_id, e);
            }
            tracing::info!("🎉 Job {} completed", job_id);
        }
        Err(error) => {
            // Validation and deadlock failures are definition bugs; outer
            // retries cannot fix them
            settle_failure(queue, &claimed, &error.to_string(), error.is_terminal()).await;
        }
    }
}

async fn settle_failure(
    queue: &Arc<JobQueue>,
    claimed: &BrokerJob,
    error: &str,
    force_terminal: bool,
) {
    if let Some(effects) = queue.effects() {
        let mut ctx = EffectContext::new(&claimed.id, &claimed.job);
        ctx.error = Some(error.to_string());
        effects.run_effects(&claimed.job.on_error, &ctx).await;
    }

    match queue.broker().fail(&claimed.id, error, force_terminal).await {
        Ok(RetryDisposition::Retried {
            attempts_made,
            next_delay_ms,
        }) => {
            tracing::warn!(
                "🔁 Job {} failed (attempt {}), outer retry in {}ms: {}",
                claimed.id,
                attempts_made,
                next_delay_ms,
                error
            );
        }
        Ok(RetryDisposition::Terminal) => {
            tracing::error!("💥 Job {} failed terminally: {}", claimed.id, error);
        }
        Err(e) => {
            tracing::error!("❌ Failed to record failure of {}: {}", claimed.id, e);
        }
    }
}
