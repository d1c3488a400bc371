/// Redis-backed queue broker
///
/// Durable implementation of the broker contract over a Redis-compatible
/// store. Each job lives in its own key as serialized JSON; per-lane sorted
/// sets order the waiting pool by priority (FIFO within equal priority) and
/// park delayed jobs by their availability instant. The claim transition
/// rides on ZPOPMIN's atomicity: exactly one worker pops an id, and from
/// then on it owns the job record. State changes are published both to a
/// local broadcast channel and to the `jobway:state` Redis channel for
/// cross-process dashboards.

use crate::error::OrchestratorError;
use crate::job::types::{Job, QueueLane};
use crate::queue::broker::{
    BrokerJob, BrokerState, JobOptions, QueueBroker, RetryDisposition, StateChange,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::broadcast;

/// Maximum delayed jobs promoted per claim poll
const PROMOTE_BATCH: isize = 100;

/// Listing scans at most this many ids before filtering by state
const LIST_SCAN_BOUND: isize = 1000;

const STATE_CHANNEL: &str = "jobway:state";

pub struct RedisBroker {
    connection: ConnectionManager,
    changes: broadcast::Sender<StateChange>,
}

fn broker_err(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Broker(e.to_string())
}

impl RedisBroker {
    /// Connect to the broker at `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self, OrchestratorError> {
        let client = redis::Client::open(redis_url).map_err(broker_err)?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(broker_err)?;
        tracing::info!("🗄️ Connected to Redis broker at {}", redis_url);
        Ok(Self {
            connection,
            changes: broadcast::channel(256).0,
        })
    }

    fn job_key(id: &str) -> String {
        format!("jobway:job:{id}")
    }

    fn waiting_key(lane: QueueLane) -> String {
        format!("jobway:{lane}:waiting")
    }

    fn delayed_key(lane: QueueLane) -> String {
        format!("jobway:{lane}:delayed")
    }

    fn lane_index_key(lane: QueueLane) -> String {
        format!("jobway:{lane}:jobs")
    }

    /// Waiting-pool score: lower pops first, so negate priority and break
    /// ties with the enqueue sequence
    fn waiting_score(job: &BrokerJob) -> f64 {
        (job.seq as f64) - (job.options.priority as f64) * 1_000_000_000.0
    }

    async fn load(&self, id: &str) -> Result<Option<BrokerJob>, OrchestratorError> {
        let mut con = self.connection.clone();
        let raw: Option<String> = con.get(Self::job_key(id)).await.map_err(broker_err)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(broker_err)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, job: &BrokerJob) -> Result<(), OrchestratorError> {
        let mut con = self.connection.clone();
        let json = serde_json::to_string(job).map_err(broker_err)?;
        let _: () = con.set(Self::job_key(&job.id), json).await.map_err(broker_err)?;
        Ok(())
    }

    async fn publish(&self, job: &BrokerJob) {
        let change = StateChange {
            id: job.id.clone(),
            lane: job.lane,
            state: job.state,
        };
        let _ = self.changes.send(change.clone());

        if let Ok(payload) = serde_json::to_string(&change) {
            let mut con = self.connection.clone();
            let result: Result<(), _> = con.publish(STATE_CHANNEL, payload).await;
            if let Err(e) = result {
                tracing::debug!("state-change publish failed: {}", e);
            }
        }
    }

    /// Move due delayed jobs into the waiting pool
    async fn promote_due(&self, lane: QueueLane) -> Result<(), OrchestratorError> {
        let mut con = self.connection.clone();
        let now_ms = Utc::now().timestamp_millis() as f64;
        let due: Vec<String> = con
            .zrangebyscore_limit(Self::delayed_key(lane), "-inf", now_ms, 0, PROMOTE_BATCH)
            .await
            .map_err(broker_err)?;

        for id in due {
            let removed: i64 = con
                .zrem(Self::delayed_key(lane), &id)
                .await
                .map_err(broker_err)?;
            if removed == 0 {
                // Another worker promoted it first
                continue;
            }
            if let Some(mut job) = self.load(&id).await? {
                job.state = BrokerState::Waiting;
                self.save(&job).await?;
                let _: () = con
                    .zadd(Self::waiting_key(lane), &id, Self::waiting_score(&job))
                    .await
                    .map_err(broker_err)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    async fn enqueue(
        &self,
        lane: QueueLane,
        job: Job,
        options: JobOptions,
    ) -> Result<String, OrchestratorError> {
        let mut con = self.connection.clone();
        let id = uuid::Uuid::new_v4().to_string();
        let seq: u64 = con.incr("jobway:seq", 1).await.map_err(broker_err)?;

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
            seq,
            result: None,
            error: None,
            enqueued_at: now,
            available_at,
            started_at: None,
            completed_at: None,
            cancel_requested: false,
        };

        self.save(&record).await?;
        let _: () = con
            .zadd(Self::lane_index_key(lane), &id, seq as f64)
            .await
            .map_err(broker_err)?;

        if delay_ms > 0 {
            let _: () = con
                .zadd(
                    Self::delayed_key(lane),
                    &id,
                    available_at.timestamp_millis() as f64,
                )
                .await
                .map_err(broker_err)?;
        } else {
            let _: () = con
                .zadd(Self::waiting_key(lane), &id, Self::waiting_score(&record))
                .await
                .map_err(broker_err)?;
        }

        self.publish(&record).await;
        tracing::debug!("📬 Enqueued job {} on lane {}", id, lane);
        Ok(id)
    }

    async fn claim_next(&self, lane: QueueLane) -> Result<Option<BrokerJob>, OrchestratorError> {
        self.promote_due(lane).await?;

        let mut con = self.connection.clone();
        loop {
            let popped: Vec<(String, f64)> = con
                .zpopmin(Self::waiting_key(lane), 1)
                .await
                .map_err(broker_err)?;
            let Some((id, _)) = popped.into_iter().next() else {
                return Ok(None);
            };

            let Some(mut job) = self.load(&id).await? else {
                // Stale index entry; keep popping
                tracing::warn!("⚠️ Waiting pool referenced missing job {}", id);
                continue;
            };

            job.state = BrokerState::Active;
            job.attempts_made += 1;
            job.started_at = Some(Utc::now());
            self.save(&job).await?;
            self.publish(&job).await;
            return Ok(Some(job));
        }
    }

    async fn complete(&self, id: &str, result: Value) -> Result<(), OrchestratorError> {
        let mut job = self
            .load(id)
            .await?
            .ok_or_else(|| OrchestratorError::Broker(format!("unknown job: {id}")))?;
        job.state = BrokerState::Completed;
        job.result = Some(result);
        job.progress = 100;
        job.completed_at = Some(Utc::now());
        self.save(&job).await?;
        self.publish(&job).await;
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        error: &str,
        force_terminal: bool,
    ) -> Result<RetryDisposition, OrchestratorError> {
        let mut job = self
            .load(id)
            .await?
            .ok_or_else(|| OrchestratorError::Broker(format!("unknown job: {id}")))?;

        job.error = Some(error.to_string());

        let retry_left = !force_terminal && job.attempts_made < job.options.attempts;
        let disposition = if retry_left {
            let backoff_ms = job
                .options
                .backoff
                .map(|p| p.delay_before_retry(job.attempts_made).as_millis() as u64)
                .unwrap_or(0);
            job.state = BrokerState::Delayed;
            job.progress = 0;
            job.result = None;
            job.available_at = Utc::now() + ChronoDuration::milliseconds(backoff_ms as i64);
            self.save(&job).await?;

            let mut con = self.connection.clone();
            let _: () = con
                .zadd(
                    Self::delayed_key(job.lane),
                    id,
                    job.available_at.timestamp_millis() as f64,
                )
                .await
                .map_err(broker_err)?;
            RetryDisposition::Retried {
                attempts_made: job.attempts_made,
                next_delay_ms: backoff_ms,
            }
        } else {
            job.state = BrokerState::Failed;
            job.completed_at = Some(Utc::now());
            self.save(&job).await?;
            RetryDisposition::Terminal
        };

        self.publish(&job).await;
        Ok(disposition)
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), OrchestratorError> {
        if let Some(mut job) = self.load(id).await? {
            job.progress = progress.min(100);
            self.save(&job).await?;
        }
        Ok(())
    }

    async fn get_job(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<Option<BrokerJob>, OrchestratorError> {
        Ok(self
            .load(id)
            .await?
            .filter(|j| lane.is_none_or(|l| j.lane == l)))
    }

    async fn get_jobs(
        &self,
        lane: QueueLane,
        states: Option<&[BrokerState]>,
        limit: usize,
    ) -> Result<Vec<BrokerJob>, OrchestratorError> {
        let mut con = self.connection.clone();
        // Newest first
        let ids: Vec<String> = con
            .zrevrange(Self::lane_index_key(lane), 0, LIST_SCAN_BOUND - 1)
            .await
            .map_err(broker_err)?;

        let mut jobs = Vec::new();
        for id in ids {
            if jobs.len() >= limit {
                break;
            }
            if let Some(job) = self.load(&id).await? {
                if states.is_none_or(|s| s.contains(&job.state)) {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    async fn request_cancel(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<bool, OrchestratorError> {
        let Some(mut job) = self
            .load(id)
            .await?
            .filter(|j| lane.is_none_or(|l| j.lane == l))
        else {
            return Ok(false);
        };
        if job.state.is_terminal() {
            return Ok(false);
        }
        job.cancel_requested = true;
        self.save(&job).await?;
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        // ConnectionManager has no explicit shutdown; dropping the broker
        // releases the multiplexed connection
        tracing::info!("🗄️ Redis broker closing");
        Ok(())
    }
}
