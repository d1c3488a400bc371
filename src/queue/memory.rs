/// In-memory queue broker
///
/// Implements the full broker contract over a mutexed map: priority and
/// FIFO ordering, delayed availability, outer-attempt retries with backoff,
/// cancel flags and state-change notifications. Used by tests and as the
/// fallback when no REDIS_URL is configured — state does not survive the
/// process.

use crate::error::OrchestratorError;
use crate::job::types::{Job, QueueLane};
use crate::queue::broker::{
    BrokerJob, BrokerState, JobOptions, QueueBroker, RetryDisposition, StateChange,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub struct InMemoryBroker {
    jobs: Mutex<HashMap<String, BrokerJob>>,
    seq: AtomicU64,
    changes: broadcast::Sender<StateChange>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            changes: broadcast::channel(256).0,
        }
    }

    fn publish(&self, job: &BrokerJob) {
        let _ = self.changes.send(StateChange {
            id: job.id.clone(),
            lane: job.lane,
            state: job.state,
        });
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BrokerJob>>, OrchestratorError> {
        self.jobs
            .lock()
            .map_err(|_| OrchestratorError::Broker("broker state poisoned".to_string()))
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn enqueue(
        &self,
        lane: QueueLane,
        job: Job,
        options: JobOptions,
    ) -> Result<String, OrchestratorError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let delay_ms = options.delay.unwrap_or(0);
        let available_at = now + ChronoDuration::milliseconds(delay_ms as i64);

        let record = BrokerJob {
            id: id.clone(),
            lane,
            job,
            options,
            state: if delay_ms > 0 {
                BrokerState::Delayed
            } else {
                BrokerState::Waiting
            },
            progress: 0,
            attempts_made: 0,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            result: None,
            error: None,
            enqueued_at: now,
            available_at,
            started_at: None,
            completed_at: None,
            cancel_requested: false,
        };

        self.publish(&record);
        self.lock()?.insert(id.clone(), record);
        tracing::debug!("📬 Enqueued job {} on lane {}", id, lane);
        Ok(id)
    }

    async fn claim_next(&self, lane: QueueLane) -> Result<Option<BrokerJob>, OrchestratorError> {
        let now = Utc::now();
        let mut jobs = self.lock()?;

        // Promote due delayed jobs so they compete on priority
        for job in jobs.values_mut() {
            if job.state == BrokerState::Delayed && job.available_at <= now {
                job.state = BrokerState::Waiting;
            }
        }

        let next_id = jobs
            .values()
            .filter(|j| j.lane == lane && j.state == BrokerState::Waiting && j.available_at <= now)
            .max_by(|a, b| {
                (a.options.priority, std::cmp::Reverse(a.seq))
                    .cmp(&(b.options.priority, std::cmp::Reverse(b.seq)))
            })
            .map(|j| j.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).expect("claimed id exists under lock");
        job.state = BrokerState::Active;
        job.attempts_made += 1;
        job.started_at = Some(now);
        let claimed = job.clone();
        drop(jobs);

        self.publish(&claimed);
        Ok(Some(claimed))
    }

    async fn complete(&self, id: &str, result: Value) -> Result<(), OrchestratorError> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::Broker(format!("unknown job: {id}")))?;
        job.state = BrokerState::Completed;
        job.result = Some(result);
        job.progress = 100;
        job.completed_at = Some(Utc::now());
        let snapshot = job.clone();
        drop(jobs);

        self.publish(&snapshot);
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        error: &str,
        force_terminal: bool,
    ) -> Result<RetryDisposition, OrchestratorError> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::Broker(format!("unknown job: {id}")))?;

        job.error = Some(error.to_string());

        let retry_left = !force_terminal && job.attempts_made < job.options.attempts;
        let disposition = if retry_left {
            let backoff_ms = job
                .options
                .backoff
                .map(|p| p.delay_before_retry(job.attempts_made).as_millis() as u64)
                .unwrap_or(0);
            // Outer retries restart the whole job from scratch
            job.state = BrokerState::Delayed;
            job.progress = 0;
            job.result = None;
            job.available_at = Utc::now() + ChronoDuration::milliseconds(backoff_ms as i64);
            RetryDisposition::Retried {
                attempts_made: job.attempts_made,
                next_delay_ms: backoff_ms,
            }
        } else {
            job.state = BrokerState::Failed;
            job.completed_at = Some(Utc::now());
            RetryDisposition::Terminal
        };

        let snapshot = job.clone();
        drop(jobs);

        self.publish(&snapshot);
        Ok(disposition)
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), OrchestratorError> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.get_mut(id) {
            job.progress = progress.min(100);
        }
        Ok(())
    }

    async fn get_job(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<Option<BrokerJob>, OrchestratorError> {
        let jobs = self.lock()?;
        Ok(jobs
            .get(id)
            .filter(|j| lane.is_none_or(|l| j.lane == l))
            .cloned())
    }

    async fn get_jobs(
        &self,
        lane: QueueLane,
        states: Option<&[BrokerState]>,
        limit: usize,
    ) -> Result<Vec<BrokerJob>, OrchestratorError> {
        let jobs = self.lock()?;
        let mut matching: Vec<BrokerJob> = jobs
            .values()
            .filter(|j| j.lane == lane)
            .filter(|j| states.is_none_or(|s| s.contains(&j.state)))
            .cloned()
            .collect();
        matching.sort_by_key(|j| std::cmp::Reverse(j.seq));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn request_cancel(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<bool, OrchestratorError> {
        let mut jobs = self.lock()?;
        match jobs
            .get_mut(id)
            .filter(|j| lane.is_none_or(|l| j.lane == l))
        {
            Some(job) if !job.state.is_terminal() => {
                job.cancel_requested = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}
