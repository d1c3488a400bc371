/// Durable Queue Layer
///
/// Three named lanes (default / cpu / gpu) over a shared broker, each with
/// its own worker pool. This module provides:
/// - The broker contract plus Redis and in-memory implementations
/// - The JobQueue facade (enqueue, status, list, cancel)
/// - Worker pools driving the dispatcher on claimed jobs
/// - Cron repeat scheduling for recurring jobs

// Broker contract and shared record types
pub mod broker;

// In-memory broker for tests and brokerless development
pub mod memory;

// Redis-backed durable broker
pub mod redis;

// Worker pools per lane
pub mod worker;

// Cron repeat service
pub mod cron;

use crate::effects::EffectDispatcher;
use crate::error::OrchestratorError;
use crate::job::types::{EffectContext, Job, JobStatus, QueueLane, StatusRecord};
use crate::job::validate::validate_pipeline;
use broker::{BrokerState, JobOptions, QueueBroker, StateChange};
use cron::CronService;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;

pub use broker::{BrokerJob, RetryDisposition};
pub use memory::InMemoryBroker;
pub use redis::RedisBroker;
pub use worker::{WorkerPool, WorkerPoolConfig};

/// Facade over the broker: derives queue options from jobs, fires
/// `onPending`, wires cron repeats, and maps broker states to the public
/// status vocabulary
pub struct JobQueue {
    broker: Arc<dyn QueueBroker>,
    /// Installed after construction — the enqueue effect handler needs the
    /// queue, and the queue needs the dispatcher for onPending
    effects: OnceLock<Arc<EffectDispatcher>>,
    cron: CronService,
}

impl JobQueue {
    pub async fn new(broker: Arc<dyn QueueBroker>) -> anyhow::Result<Arc<Self>> {
        let cron = CronService::new().await?;
        cron.start().await?;
        Ok(Arc::new(Self {
            broker,
            effects: OnceLock::new(),
            cron,
        }))
    }

    /// Install the effect dispatcher (once, during wiring)
    pub fn install_effects(&self, effects: Arc<EffectDispatcher>) {
        if self.effects.set(effects).is_err() {
            tracing::warn!("⚠️ Effect dispatcher installed twice; keeping the first");
        }
    }

    pub fn effects(&self) -> Option<&Arc<EffectDispatcher>> {
        self.effects.get()
    }

    pub fn broker(&self) -> &Arc<dyn QueueBroker> {
        &self.broker
    }

    /// Accept a job: validate, derive options, persist, register any cron
    /// repeat, and fire `onPending`. Returns the broker-assigned id.
    pub fn enqueue<'a>(
        self: &'a Arc<Self>,
        job: Job,
    ) -> Pin<Box<dyn Future<Output = Result<String, OrchestratorError>> + Send + 'a>> {
        Box::pin(async move {
            if job.task_type.is_empty() {
                return Err(OrchestratorError::Validation(
                    "job is missing a type".to_string(),
                ));
            }
            if let Some(steps) = &job.steps {
                validate_pipeline(steps)?;
            }

            let lane = job.queue;
            let options = JobOptions::from_job(&job);
            let id = self.broker.enqueue(lane, job.clone(), options).await?;
            tracing::info!("📥 Accepted job {} ({}) on lane {}", id, job.task_type, lane);

            if let Some(pattern) = &job.cron {
                if let Err(e) = self
                    .cron
                    .schedule_repeat(Arc::downgrade(self), &id, pattern, &job)
                    .await
                {
                    tracing::error!("❌ Invalid cron pattern '{}' for job {}: {}", pattern, id, e);
                }
            }

            if let Some(effects) = self.effects() {
                let ctx = EffectContext::new(&id, &job);
                effects.run_effects(&job.on_pending, &ctx).await;
            }

            Ok(id)
        })
    }

    /// Public status lookup
    pub async fn status(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<Option<StatusRecord>, OrchestratorError> {
        Ok(self
            .broker
            .get_job(id, lane)
            .await?
            .map(|j| j.status_record()))
    }

    /// List jobs in a lane, optionally filtered by public status
    pub async fn list(
        &self,
        lane: QueueLane,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<StatusRecord>, OrchestratorError> {
        let states: Option<Vec<BrokerState>> = status.map(|s| match s {
            JobStatus::Completed => vec![BrokerState::Completed],
            JobStatus::Failed => vec![BrokerState::Failed, BrokerState::Stuck],
            JobStatus::Running => vec![BrokerState::Active],
            JobStatus::Pending => vec![
                BrokerState::Waiting,
                BrokerState::Delayed,
                BrokerState::Paused,
            ],
        });

        let jobs = self
            .broker
            .get_jobs(lane, states.as_deref(), limit)
            .await?;
        Ok(jobs.iter().map(BrokerJob::status_record).collect())
    }

    /// Request best-effort cancellation
    ///
    /// Returns false when the job is already terminal or unknown. A pending
    /// job's cron schedule is removed so it stops repeating.
    pub async fn cancel(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<bool, OrchestratorError> {
        let accepted = self.broker.request_cancel(id, lane).await?;
        if accepted {
            self.cron.remove(id).await;
            tracing::info!("🛑 Cancel requested for job {}", id);
        }
        Ok(accepted)
    }

    /// Subscribe to broker state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.broker.subscribe()
    }

    /// Stop the cron service and close the broker
    pub async fn close(&self) -> Result<(), OrchestratorError> {
        if let Err(e) = self.cron.shutdown().await {
            tracing::warn!("⚠️ Cron shutdown reported: {}", e);
        }
        self.broker.close().await
    }
}
