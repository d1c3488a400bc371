/// Queue broker contract and shared record types
///
/// The broker is the single source of truth for persistent job state. The
/// core only assumes this contract: enqueue with options (priority,
/// attempts, backoff, delay, repeat), atomic claim, atomic state
/// transitions, a progress field, lookup and listing, cancel requests, and
/// state-change notifications. Two implementations exist — Redis for
/// production, in-memory for tests and brokerless development.

use crate::error::OrchestratorError;
use crate::job::types::{Job, JobStatus, QueueLane, RetryPolicy, StatusRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Internal broker states, mapped to the four public statuses on lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
    Paused,
    Stuck,
}

impl BrokerState {
    /// The public status a caller sees
    pub fn public(&self) -> JobStatus {
        match self {
            BrokerState::Completed => JobStatus::Completed,
            BrokerState::Failed | BrokerState::Stuck => JobStatus::Failed,
            BrokerState::Active => JobStatus::Running,
            BrokerState::Waiting | BrokerState::Delayed | BrokerState::Paused => JobStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BrokerState::Completed | BrokerState::Failed)
    }
}

/// Options derived from a job at enqueue time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// Higher runs sooner within a lane
    pub priority: i64,
    /// Outer attempts: the entire job (pipeline included) re-runs on failure
    pub attempts: u32,
    /// Backoff between outer attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<RetryPolicy>,
    /// Deferred start in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Cron repeat pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
}

impl JobOptions {
    /// Derive queue options from the job's declarative fields
    pub fn from_job(job: &Job) -> Self {
        Self {
            priority: job.priority.unwrap_or(0),
            attempts: job.retry.map_or(1, |r| r.attempts.max(1)),
            backoff: job.retry,
            delay: job.delay,
            repeat: job.cron.clone(),
        }
    }
}

/// A job as the broker tracks it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerJob {
    pub id: String,
    pub lane: QueueLane,
    pub job: Job,
    pub options: JobOptions,
    pub state: BrokerState,
    pub progress: u8,
    /// Outer attempts consumed so far (incremented on claim)
    pub attempts_made: u32,
    /// FIFO tiebreaker within equal priority
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest instant the job may be claimed (enqueue time plus delay or
    /// outer-retry backoff)
    pub available_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Best-effort cancellation flag checked by workers before execution
    #[serde(default)]
    pub cancel_requested: bool,
}

impl BrokerJob {
    /// Public status-lookup payload
    pub fn status_record(&self) -> StatusRecord {
        StatusRecord {
            id: self.id.clone(),
            status: self.state.public(),
            result: self.result.clone(),
            error: self.error.clone(),
            progress: Some(self.progress),
            started_at: self.started_at,
            completed_at: self.completed_at,
            task_type: Some(self.job.task_type.clone()),
            queue: Some(self.lane.as_str().to_string()),
        }
    }
}

/// Published on every broker state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub id: String,
    pub lane: QueueLane,
    pub state: BrokerState,
}

/// What the broker decided after a failure report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Another outer attempt was scheduled after the given backoff
    Retried { attempts_made: u32, next_delay_ms: u64 },
    /// The job is terminally failed
    Terminal,
}

/// Durable queue contract (see the Redis and in-memory implementations)
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Persist a job and make it claimable (after its delay). Returns the
    /// broker-assigned id.
    async fn enqueue(
        &self,
        lane: QueueLane,
        job: Job,
        options: JobOptions,
    ) -> Result<String, OrchestratorError>;

    /// Atomically claim the next runnable job in a lane, marking it active
    /// and consuming one outer attempt
    async fn claim_next(&self, lane: QueueLane) -> Result<Option<BrokerJob>, OrchestratorError>;

    /// Record successful completion
    async fn complete(&self, id: &str, result: Value) -> Result<(), OrchestratorError>;

    /// Record a failure; unless `force_terminal`, the broker may schedule
    /// another outer attempt per the job's options
    async fn fail(
        &self,
        id: &str,
        error: &str,
        force_terminal: bool,
    ) -> Result<RetryDisposition, OrchestratorError>;

    /// Update the per-job progress field
    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), OrchestratorError>;

    /// Look up a job by id (lane is an optional narrowing hint)
    async fn get_job(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<Option<BrokerJob>, OrchestratorError>;

    /// List jobs in a lane, optionally filtered to a set of states, newest
    /// first
    async fn get_jobs(
        &self,
        lane: QueueLane,
        states: Option<&[BrokerState]>,
        limit: usize,
    ) -> Result<Vec<BrokerJob>, OrchestratorError>;

    /// Flag a job for best-effort cancellation. Returns false when the job
    /// is already terminal (or unknown).
    async fn request_cancel(
        &self,
        id: &str,
        lane: Option<QueueLane>,
    ) -> Result<bool, OrchestratorError>;

    /// Subscribe to state transitions
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;

    /// Flush and release broker resources; in-flight state survives in the
    /// broker's own records
    async fn close(&self) -> Result<(), OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broker_state_maps_to_public_status() {
        assert_eq!(BrokerState::Completed.public(), JobStatus::Completed);
        assert_eq!(BrokerState::Failed.public(), JobStatus::Failed);
        assert_eq!(BrokerState::Stuck.public(), JobStatus::Failed);
        assert_eq!(BrokerState::Active.public(), JobStatus::Running);
        assert_eq!(BrokerState::Waiting.public(), JobStatus::Pending);
        assert_eq!(BrokerState::Delayed.public(), JobStatus::Pending);
        assert_eq!(BrokerState::Paused.public(), JobStatus::Pending);
    }

    #[test]
    fn options_derive_from_job() {
        let job: Job = serde_json::from_value(json!({
            "type": "echo",
            "payload": {},
            "priority": 7,
            "delay": 250,
            "cron": "0 */5 * * * *",
            "retry": {"attempts": 3, "backoff": "fixed", "delay": 100}
        }))
        .unwrap();

        let options = JobOptions::from_job(&job);
        assert_eq!(options.priority, 7);
        assert_eq!(options.attempts, 3);
        assert_eq!(options.delay, Some(250));
        assert_eq!(options.repeat.as_deref(), Some("0 */5 * * * *"));
    }
}
