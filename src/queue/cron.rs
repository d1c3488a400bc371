/// Cron repeat service for scheduled jobs
///
/// Jobs submitted with a `cron` pattern re-enqueue a fresh copy on every
/// fire. Built on tokio-cron-scheduler with a uuid map per source job so a
/// cancelled job's schedule can be removed without touching the others; a
/// schedule whose queue has shut down simply skips its tick.

use crate::job::types::Job;
use crate::queue::JobQueue;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Weak;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

pub struct CronService {
    scheduler: RwLock<JobScheduler>,
    /// Source job id → scheduler uuid, for removal on cancel
    job_uuid_map: RwLock<HashMap<String, Uuid>>,
}

impl CronService {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: RwLock::new(scheduler),
            job_uuid_map: RwLock::new(HashMap::new()),
        })
    }

    /// Start firing registered schedules
    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler.start().await?;
        tracing::info!("⏰ Cron repeat service started");
        Ok(())
    }

    /// Register a repeating schedule for a submitted job
    ///
    /// The repeated copy drops `cron` and `delay` so each fire enqueues one
    /// immediate, non-repeating job.
    pub async fn schedule_repeat(
        &self,
        queue: Weak<JobQueue>,
        source_job_id: &str,
        pattern: &str,
        job: &Job,
    ) -> Result<()> {
        // Replace any existing schedule for this job id
        self.remove(source_job_id).await;

        let mut template = job.clone();
        template.cron = None;
        template.delay = None;

        let source_id = source_job_id.to_string();
        let task_type = template.task_type.clone();

        let cron_job = CronJob::new_async(pattern, move |_uuid, _lock| {
            let queue = queue.clone();
            let template = template.clone();
            let source_id = source_id.clone();
            let task_type = task_type.clone();

            Box::pin(async move {
                let Some(queue) = queue.upgrade() else {
                    tracing::debug!("⏭️ Cron fire skipped, queue is gone: {}", source_id);
                    return;
                };
                tracing::info!("🔔 Cron fire for job {} ({})", source_id, task_type);
                match queue.enqueue(template).await {
                    Ok(id) => {
                        tracing::info!("⏰ Cron enqueued repeat {} of {}", id, source_id);
                    }
                    Err(e) => {
                        tracing::error!("❌ Cron repeat of {} failed to enqueue: {}", source_id, e);
                    }
                }
            })
        })?;

        let uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(cron_job).await?
        };
        self.job_uuid_map
            .write()
            .await
            .insert(source_job_id.to_string(), uuid);

        tracing::info!("⏰ Registered cron schedule '{}' for job {}", pattern, source_job_id);
        Ok(())
    }

    /// Remove the schedule attached to a job id, if any
    pub async fn remove(&self, source_job_id: &str) {
        let uuid = self.job_uuid_map.write().await.remove(source_job_id);
        if let Some(uuid) = uuid {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&uuid).await {
                tracing::warn!("⚠️ Failed to remove cron schedule for {}: {}", source_job_id, e);
            } else {
                tracing::debug!("🛑 Removed cron schedule for {}", source_job_id);
            }
        }
    }

    /// Stop the scheduler and drop every schedule
    pub async fn shutdown(&self) -> Result<()> {
        self.job_uuid_map.write().await.clear();
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        tracing::info!("⏰ Cron repeat service stopped");
        Ok(())
    }
}
