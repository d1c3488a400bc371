/// Core job and pipeline type definitions
///
/// Defines the declarative data model submitted by callers: jobs, pipeline
/// steps, retry policies, resource hints and effect records. These types are
/// serialized/deserialized from JSON and stored verbatim in the queue broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A single declarative job submission
///
/// A job is either a single task (no `steps`) routed directly to a backend,
/// or a pipeline of interdependent steps. Everything the caller controls —
/// routing lane, priority, retries, lifecycle effects — travels in this one
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Opaque task identifier; for single-task jobs this is the routing key
    /// passed to the backend (e.g. "audio.transcribe")
    #[serde(rename = "type")]
    pub task_type: String,

    /// Caller-provided data, referenced from templates as `payload.*`
    pub payload: Value,

    /// Backend hint: a registered adapter name, or "auto" (first healthy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Routing lane (default / cpu / gpu)
    #[serde(default)]
    pub queue: QueueLane,

    /// Higher priority runs sooner within a lane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    /// Deferred start in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Cron pattern for repeating jobs (e.g. "0 */5 * * * *")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Retry policy for single-task jobs; also inherited by steps that omit
    /// their own, and applied at the outer (whole-job) attempt level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Advisory resource requirements (never enforced by the core)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceHint>,

    /// Pipeline steps; presence makes the job a pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,

    /// Effects fired when the job is accepted into the queue
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_pending: Vec<Effect>,

    /// Effects fired on each progress tick
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_progress: Vec<Effect>,

    /// Effects fired with the final result on completion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Effect>,

    /// Effects fired with the error message on failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_error: Vec<Effect>,
}

/// A single node in a pipeline
///
/// Steps reference each other's results through the template language and
/// declare ordering through `dependsOn`. A pipeline where any step carries
/// an `id` or `dependsOn` runs in DAG mode; otherwise steps run in array
/// order (sequential mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Task identifier passed to the backend
    pub task: String,

    /// Step id; missing ids are synthesized as `step_<index>` in DAG mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Ids of predecessor steps that must resolve before this one runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Field → value-or-template mapping; becomes the child task's payload
    /// after template substitution
    #[serde(default)]
    pub input: Map<String, Value>,

    /// Template that must resolve to a sequence; the step executes once per
    /// element with `{item, index}` added to the context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,

    /// Maximum parallel executions inside a forEach (default: unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each_concurrency: Option<usize>,

    /// If true, a failed attempt is reclassified as skipped and downstream
    /// steps still run
    #[serde(default)]
    pub optional: bool,

    /// Overrides the parent job's retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Overrides the parent job's resource hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceHint>,
}

impl Step {
    /// Effective id for a step at a given declaration index
    pub fn effective_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("step_{index}"))
    }
}

/// Named queue lane with its own worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueLane {
    #[default]
    Default,
    Cpu,
    Gpu,
}

impl QueueLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueLane::Default => "default",
            QueueLane::Cpu => "cpu",
            QueueLane::Gpu => "gpu",
        }
    }

    /// Parse a lane name; unknown names fall back to the default lane
    pub fn parse(name: &str) -> QueueLane {
        match name {
            "cpu" => QueueLane::Cpu,
            "gpu" => QueueLane::Gpu,
            _ => QueueLane::Default,
        }
    }

    pub fn all() -> [QueueLane; 3] {
        [QueueLane::Default, QueueLane::Cpu, QueueLane::Gpu]
    }
}

impl std::fmt::Display for QueueLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy applied per attempt
///
/// The wait before retry k (1-indexed over retries, so the first retry is
/// k = 1) is `delay` for fixed backoff and `delay * 2^(k-1)` for exponential.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub attempts: u32,

    /// Backoff shape between attempts
    #[serde(default)]
    pub backoff: Backoff,

    /// Base delay in milliseconds
    #[serde(default)]
    pub delay: u64,
}

/// Backoff shape between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

impl RetryPolicy {
    /// Wait before the given retry (1-indexed: 1 = first retry)
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                self.delay
                    .saturating_mul(1u64 << retry.saturating_sub(1).min(32))
            }
        };
        Duration::from_millis(ms)
    }
}

/// Advisory resource requirements attached to a job or step
///
/// The core never enforces these; they travel to the backend which may use
/// them for placement or refusal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHint {
    /// GPU kind required (e.g. "T4", "A10G", "A100")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,

    /// Minimum GPU memory in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_mb: Option<u64>,

    /// Minimum RAM in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_mb: Option<u64>,

    /// Execution timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// A declarative lifecycle effect record
///
/// Effects are semi-structured on purpose: the `$event` discriminant routes
/// the record to a registered handler, and unknown kinds degrade to a
/// warning instead of failing job submission. Per-kind payloads are
/// deserialized inside the matching handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Effect(pub Value);

impl Effect {
    /// The `$event` discriminant, if present
    pub fn kind(&self) -> Option<&str> {
        self.0.get("$event").and_then(|v| v.as_str())
    }
}

/// Runtime state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    /// Completed and skipped both satisfy downstream dependencies
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, StepState::Completed | StepState::Skipped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Skipped
        )
    }
}

/// Per-step status snapshot reported alongside pipeline results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub id: String,
    pub task: String,
    pub status: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl StepStatus {
    pub fn pending(id: &str, task: &str) -> Self {
        Self {
            id: id.to_string(),
            task: task.to_string(),
            status: StepState::Pending,
            started_at: None,
            completed_at: None,
            duration: None,
            error: None,
            result: None,
        }
    }
}

/// Aggregate result of a successful pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Raw step results in declaration order
    pub steps: Vec<Value>,

    /// Step id → raw result
    pub step_results: Map<String, Value>,

    /// Per-step status snapshots in declaration order
    pub step_status: Vec<StepStatus>,

    /// Raw result of the last declared step
    pub final_result: Value,

    /// Total wall-clock duration in milliseconds
    pub total_duration: u64,

    /// Sets of step ids launched together in one scheduling iteration
    pub parallel_groups: Vec<Vec<String>>,
}

/// The resolved unit of work handed to a backend adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique id for this execution attempt group
    pub id: String,

    /// Task identifier routing to a task function on the remote service
    pub task_type: String,

    /// Fully template-resolved payload
    pub payload: Value,

    /// Backend hint carried from the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Advisory resources (step-level override or job-level)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceHint>,
}

/// Remote execution state returned by `Backend::get_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resources advertised by a backend via `get_resources`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePool {
    /// GPU kinds available on the backend
    #[serde(default)]
    pub gpus: Vec<String>,
    /// Total RAM in MB
    #[serde(default)]
    pub ram_mb: u64,
    /// Total GPU memory in MB
    #[serde(default)]
    pub vram_mb: u64,
}

/// Mutable resolution context threaded through a pipeline run
///
/// The resolver sees this as a plain JSON mapping: `payload` is the job's
/// payload, `steps` accumulates results keyed by id and by declaration index
/// (plus the generated `step_<i>` alias), and forEach execution temporarily
/// adds `item` / `index` at the top level.
#[derive(Debug, Clone)]
pub struct JobContext {
    root: Map<String, Value>,
}

impl JobContext {
    pub fn new(payload: Value) -> Self {
        let mut root = Map::new();
        root.insert("payload".to_string(), payload);
        root.insert("steps".to_string(), Value::Object(Map::new()));
        Self { root }
    }

    /// Record a step result under its id, its declaration index, and the
    /// generated `step_<index>` alias
    pub fn add_step_result(&mut self, id: &str, index: usize, result: Value) {
        if let Some(Value::Object(steps)) = self.root.get_mut("steps") {
            steps.insert(id.to_string(), result.clone());
            steps.insert(index.to_string(), result.clone());
            let alias = format!("step_{index}");
            if alias != id {
                steps.insert(alias, result);
            }
        }
    }

    /// Clone of this context with `item` / `index` bound for one forEach
    /// element
    pub fn with_item(&self, item: Value, index: usize) -> Self {
        let mut root = self.root.clone();
        root.insert("item".to_string(), item);
        root.insert("index".to_string(), Value::from(index as u64));
        Self { root }
    }

    /// The context as a JSON mapping for path lookups
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }
}

/// Public job states exposed by the status API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status-lookup payload for a queued job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Context handed to effect handlers
#[derive(Debug, Clone)]
pub struct EffectContext {
    /// Queue-assigned job id
    pub job_id: String,
    /// The enclosing job as submitted
    pub job: Job,
    /// Final result, when firing onSuccess
    pub result: Option<Value>,
    /// Error message, when firing onError
    pub error: Option<String>,
    /// Progress percentage, when firing onProgress
    pub progress: Option<u8>,
}

impl EffectContext {
    pub fn new(job_id: &str, job: &Job) -> Self {
        Self {
            job_id: job_id.to_string(),
            job: job.clone(),
            result: None,
            error: None,
            progress: None,
        }
    }

    /// Template context for interpolation inside effect strings
    pub fn template_context(&self) -> JobContext {
        let mut ctx = JobContext::new(self.job.payload.clone());
        ctx.root
            .insert("jobId".to_string(), Value::String(self.job_id.clone()));
        if let Some(result) = &self.result {
            ctx.root.insert("result".to_string(), result.clone());
        }
        if let Some(error) = &self.error {
            ctx.root
                .insert("error".to_string(), Value::String(error.clone()));
        }
        if let Some(progress) = self.progress {
            ctx.root
                .insert("progress".to_string(), Value::from(progress));
        }
        ctx
    }
}

/// True when any step names an id or dependency, putting the pipeline in
/// DAG mode
pub fn is_dag_mode(steps: &[Step]) -> bool {
    steps
        .iter()
        .any(|s| s.id.is_some() || !s.depends_on.is_empty())
}

/// Effective ids for every step in declaration order
pub fn effective_ids(steps: &[Step]) -> Vec<String> {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| s.effective_id(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_deserializes_wire_names() {
        let job: Job = serde_json::from_value(json!({
            "type": "audio.transcribe",
            "payload": {"audio_path": "s3://bucket/a.wav"},
            "queue": "gpu",
            "retry": {"attempts": 3, "backoff": "exponential", "delay": 100},
            "steps": [
                {"task": "t", "id": "a"},
                {"task": "u", "dependsOn": ["a"], "forEach": "{{payload.items}}",
                 "forEachConcurrency": 2, "optional": true}
            ],
            "onSuccess": [{"$event": "toast", "message": "done"}]
        }))
        .unwrap();

        assert_eq!(job.task_type, "audio.transcribe");
        assert_eq!(job.queue, QueueLane::Gpu);
        let steps = job.steps.unwrap();
        assert_eq!(steps[1].depends_on, vec!["a"]);
        assert_eq!(steps[1].for_each.as_deref(), Some("{{payload.items}}"));
        assert_eq!(steps[1].for_each_concurrency, Some(2));
        assert!(steps[1].optional);
        assert_eq!(job.on_success[0].kind(), Some("toast"));
    }

    #[test]
    fn retry_delays() {
        let fixed = RetryPolicy {
            attempts: 3,
            backoff: Backoff::Fixed,
            delay: 100,
        };
        assert_eq!(fixed.delay_before_retry(1), Duration::from_millis(100));
        assert_eq!(fixed.delay_before_retry(2), Duration::from_millis(100));

        let exp = RetryPolicy {
            attempts: 4,
            backoff: Backoff::Exponential,
            delay: 100,
        };
        assert_eq!(exp.delay_before_retry(1), Duration::from_millis(100));
        assert_eq!(exp.delay_before_retry(2), Duration::from_millis(200));
        assert_eq!(exp.delay_before_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn dag_mode_detection() {
        let plain = vec![Step {
            task: "t".into(),
            id: None,
            depends_on: vec![],
            input: Map::new(),
            for_each: None,
            for_each_concurrency: None,
            optional: false,
            retry: None,
            resources: None,
        }];
        assert!(!is_dag_mode(&plain));

        let mut named = plain.clone();
        named[0].id = Some("x".into());
        assert!(is_dag_mode(&named));
    }

    #[test]
    fn context_exposes_results_by_id_index_and_alias() {
        let mut ctx = JobContext::new(json!({"x": 1}));
        ctx.add_step_result("fetch", 0, json!({"ok": true}));

        let steps = ctx.as_map().get("steps").unwrap();
        assert_eq!(steps["fetch"]["ok"], json!(true));
        assert_eq!(steps["0"]["ok"], json!(true));
        assert_eq!(steps["step_0"]["ok"], json!(true));
    }
}
