/// Step-level observability events
///
/// The step runner publishes `step:start` / `step:complete` / `step:error`
/// records to a process-wide broadcast channel. Dashboards and tests
/// subscribe; with no subscriber a publish is free. Every event is also
/// mirrored to tracing so the log stream stays useful on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// What happened to the step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepEventKind {
    Start,
    Complete,
    Error,
}

/// One step lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub kind: StepEventKind,
    /// Queue-assigned id of the enclosing job
    pub job_id: String,
    pub step_id: String,
    pub task: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration in milliseconds (complete/error only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on error events for optional steps that were absorbed as skips
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

fn channel() -> &'static broadcast::Sender<StepEvent> {
    static CHANNEL: OnceLock<broadcast::Sender<StepEvent>> = OnceLock::new();
    CHANNEL.get_or_init(|| broadcast::channel(CHANNEL_CAPACITY).0)
}

/// Subscribe to step events
pub fn subscribe() -> broadcast::Receiver<StepEvent> {
    channel().subscribe()
}

/// Publish a step event (no-op without subscribers)
pub fn emit(event: StepEvent) {
    match event.kind {
        StepEventKind::Start => {
            tracing::info!("▶️ step:start {} ({})", event.step_id, event.task);
        }
        StepEventKind::Complete => {
            tracing::info!(
                "✅ step:complete {} in {}ms",
                event.step_id,
                event.duration.unwrap_or(0)
            );
        }
        StepEventKind::Error => {
            tracing::warn!(
                "❌ step:error {} — {} (optional: {})",
                event.step_id,
                event.error.as_deref().unwrap_or("unknown"),
                event.optional.unwrap_or(false)
            );
        }
    }
    let _ = channel().send(event);
}

impl StepEvent {
    pub fn start(job_id: &str, step_id: &str, task: &str) -> Self {
        Self {
            kind: StepEventKind::Start,
            job_id: job_id.to_string(),
            step_id: step_id.to_string(),
            task: task.to_string(),
            timestamp: Utc::now(),
            duration: None,
            error: None,
            optional: None,
        }
    }

    pub fn complete(job_id: &str, step_id: &str, task: &str, duration_ms: u64) -> Self {
        Self {
            kind: StepEventKind::Complete,
            duration: Some(duration_ms),
            ..Self::start(job_id, step_id, task)
        }
    }

    pub fn error(
        job_id: &str,
        step_id: &str,
        task: &str,
        duration_ms: u64,
        error: &str,
        optional: bool,
    ) -> Self {
        Self {
            kind: StepEventKind::Error,
            duration: Some(duration_ms),
            error: Some(error.to_string()),
            optional: Some(optional),
            ..Self::start(job_id, step_id, task)
        }
    }
}
