//! Queue-to-worker integration over the in-memory broker: a submitted job
//! travels enqueue → claim → dispatch → terminal state, with lifecycle
//! effects firing along the way.

use async_trait::async_trait;
use jobway::backend::{register, Backend};
use jobway::config::Config;
use jobway::effects::channels::subscribe_toasts;
use jobway::effects::EffectDispatcher;
use jobway::error::OrchestratorError;
use jobway::job::types::{JobStatus, TaskRequest, TaskResult};
use jobway::queue::{InMemoryBroker, JobQueue, WorkerPool, WorkerPoolConfig};
use jobway::Job;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoBackend {
    name: String,
    fail_first: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Backend for EchoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &TaskRequest) -> Result<Value, OrchestratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(OrchestratorError::BackendExecution(format!(
                "not yet ({n})"
            )));
        }
        Ok(task.payload.clone())
    }

    async fn get_status(&self, task_id: &str) -> Result<TaskResult, OrchestratorError> {
        Ok(TaskResult {
            id: task_id.to_string(),
            status: "completed".to_string(),
            result: None,
            error: None,
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

fn install(name: &str, fail_first: u32) {
    register(Arc::new(EchoBackend {
        name: name.to_string(),
        fail_first,
        calls: AtomicU32::new(0),
    }));
}

async fn queue_with_workers() -> (Arc<JobQueue>, WorkerPool) {
    let queue = JobQueue::new(Arc::new(InMemoryBroker::new()))
        .await
        .expect("queue init");
    let effects = Arc::new(EffectDispatcher::with_defaults(
        queue.clone(),
        &Config::default(),
    ));
    queue.install_effects(effects);
    let workers = WorkerPool::start(
        queue.clone(),
        WorkerPoolConfig {
            concurrency: 2,
            gpu_concurrency: 1,
        },
    );
    (queue, workers)
}

/// The toast channel is process-wide, so tests running in parallel see each
/// other's toasts; drain until one matches.
async fn wait_for_toast(
    rx: &mut tokio::sync::broadcast::Receiver<jobway::effects::channels::ToastRecord>,
    mut matches: impl FnMut(&jobway::effects::channels::ToastRecord) -> bool,
) -> jobway::effects::channels::ToastRecord {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(toast) if matches(&toast) => return toast,
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("toast channel closed: {e}"),
            }
        }
    })
    .await
    .expect("expected toast within deadline")
}

async fn wait_for_terminal(queue: &Arc<JobQueue>, id: &str) -> JobStatus {
    for _ in 0..100 {
        if let Some(record) = queue.status(id, None).await.expect("status lookup") {
            if matches!(record.status, JobStatus::Completed | JobStatus::Failed) {
                return record.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {id} never reached a terminal state");
}

fn job(value: Value) -> Job {
    serde_json::from_value(value).expect("valid job document")
}

#[tokio::test(flavor = "multi_thread")]
async fn submitted_pipeline_completes_and_fires_success_effects() {
    install("worker-echo", 0);
    let mut toasts = subscribe_toasts();
    let (queue, workers) = queue_with_workers().await;

    let id = queue
        .enqueue(job(json!({
            "type": "pipeline",
            "payload": {"word": "hi"},
            "backend": "worker-echo",
            "steps": [
                {"id": "say", "task": "echo", "input": {"said": "{{payload.word}}"}}
            ],
            "onSuccess": [
                {"$event": "toast", "message": "job {{jobId}} said {{payload.word}}"}
            ]
        })))
        .await
        .expect("enqueue");

    assert_eq!(wait_for_terminal(&queue, &id).await, JobStatus::Completed);

    let record = queue.status(&id, None).await.unwrap().unwrap();
    assert_eq!(record.progress, Some(100));
    let result = record.result.expect("pipeline result recorded");
    assert_eq!(result["finalResult"], json!({"said": "hi"}));

    let toast = wait_for_toast(&mut toasts, |t| t.task_id == id).await;
    assert_eq!(toast.message, format!("job {id} said hi"));

    workers.shutdown().await;
    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn outer_retry_reruns_the_whole_job_until_it_succeeds() {
    // Inner retry burns both calls of the first outer attempt; the outer
    // tier re-runs the whole job and the third call succeeds
    install("worker-flaky", 2);
    let (queue, workers) = queue_with_workers().await;

    let id = queue
        .enqueue(job(json!({
            "type": "echo",
            "payload": {"n": 1},
            "backend": "worker-flaky",
            "retry": {"attempts": 2, "backoff": "fixed", "delay": 20}
        })))
        .await
        .expect("enqueue");

    assert_eq!(wait_for_terminal(&queue, &id).await, JobStatus::Completed);
    let record = queue.status(&id, None).await.unwrap().unwrap();
    assert_eq!(record.result, Some(json!({"n": 1})));

    workers.shutdown().await;
    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_job_records_the_error_and_fires_on_error() {
    install("worker-dead", u32::MAX);
    let mut toasts = subscribe_toasts();
    let (queue, workers) = queue_with_workers().await;

    let id = queue
        .enqueue(job(json!({
            "type": "echo",
            "payload": {},
            "backend": "worker-dead",
            "onError": [
                {"$event": "toast", "message": "failed: {{error}}", "level": "error"}
            ]
        })))
        .await
        .expect("enqueue");

    assert_eq!(wait_for_terminal(&queue, &id).await, JobStatus::Failed);
    let record = queue.status(&id, None).await.unwrap().unwrap();
    assert!(record.error.expect("error recorded").contains("not yet"));

    let toast = wait_for_toast(&mut toasts, |t| t.task_id == id).await;
    assert_eq!(toast.level.as_deref(), Some("error"));
    assert!(toast.message.starts_with("failed: "));

    workers.shutdown().await;
    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_effect_chains_a_child_job() {
    install("worker-chain", 0);
    let (queue, workers) = queue_with_workers().await;

    let id = queue
        .enqueue(job(json!({
            "type": "echo",
            "payload": {"stage": "parent"},
            "backend": "worker-chain",
            "onSuccess": [
                {"$event": "enqueue", "job": {
                    "type": "echo",
                    "backend": "worker-chain",
                    "payload": {"stage": "child", "from": "{{jobId}}"}
                }}
            ]
        })))
        .await
        .expect("enqueue parent");

    assert_eq!(wait_for_terminal(&queue, &id).await, JobStatus::Completed);

    // The child lands on the same lane; find it and wait for completion
    let mut child_id = None;
    for _ in 0..100 {
        let records = queue
            .list(jobway::QueueLane::Default, None, 50)
            .await
            .unwrap();
        child_id = records.iter().find(|r| r.id != id).map(|r| r.id.clone());
        if child_id.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let child_id = child_id.expect("child job enqueued");

    assert_eq!(wait_for_terminal(&queue, &child_id).await, JobStatus::Completed);
    let child = queue.status(&child_id, None).await.unwrap().unwrap();
    assert_eq!(child.result.unwrap()["from"], json!(id));

    workers.shutdown().await;
    queue.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_requested_before_pickup_prevents_execution() {
    install("worker-cancel", 0);
    let queue = JobQueue::new(Arc::new(InMemoryBroker::new()))
        .await
        .expect("queue init");
    let effects = Arc::new(EffectDispatcher::with_defaults(
        queue.clone(),
        &Config::default(),
    ));
    queue.install_effects(effects);

    // Enqueue with a delay so the cancel lands before any worker exists
    let id = queue
        .enqueue(job(json!({
            "type": "echo",
            "payload": {},
            "backend": "worker-cancel",
            "delay": 100
        })))
        .await
        .expect("enqueue");

    assert!(queue.cancel(&id, None).await.unwrap());

    // Workers start only now
    let workers = WorkerPool::start(
        queue.clone(),
        WorkerPoolConfig {
            concurrency: 1,
            gpu_concurrency: 1,
        },
    );

    assert_eq!(wait_for_terminal(&queue, &id).await, JobStatus::Failed);
    let record = queue.status(&id, None).await.unwrap().unwrap();
    assert!(record.error.unwrap().contains("cancelled"));

    workers.shutdown().await;
    queue.close().await.unwrap();
}
