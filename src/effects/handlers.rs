/// Built-in effect handlers
///
/// toast / invalidate / emit publish to in-process channels; webhook and
/// notify do outbound HTTP; enqueue builds a child job from a
/// deep-interpolated template and hands it back to the queue — the core's
/// fan-out and chaining mechanism. String fields support `{{…}}`
/// interpolation against `{payload, result, error, jobId, progress}`.

use crate::config::Config;
use crate::effects::channels::{
    publish_event, publish_invalidation, publish_toast, CustomEvent, InvalidateRecord, ToastRecord,
};
use crate::effects::{EffectDispatcher, EffectHandler};
use crate::job::template::{deep_interpolate, interpolate};
use crate::job::types::{Effect, EffectContext, Job};
use crate::queue::JobQueue;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

impl EffectDispatcher {
    /// Dispatcher with every built-in handler registered
    pub fn with_defaults(queue: Arc<JobQueue>, config: &Config) -> Self {
        let client = reqwest::Client::new();
        let mut dispatcher = EffectDispatcher::new();
        dispatcher.register("toast", Arc::new(ToastHandler));
        dispatcher.register(
            "webhook",
            Arc::new(WebhookHandler {
                client: client.clone(),
            }),
        );
        dispatcher.register(
            "notify",
            Arc::new(NotifyHandler {
                client,
                slack_webhook_url: config.notify.slack_webhook_url.clone(),
                discord_webhook_url: config.notify.discord_webhook_url.clone(),
            }),
        );
        dispatcher.register("invalidate", Arc::new(InvalidateHandler));
        dispatcher.register("emit", Arc::new(EmitHandler));
        dispatcher.register("enqueue", Arc::new(EnqueueHandler { queue }));
        dispatcher
    }
}

/// Emit a UI notification to the process-wide toast channel
pub struct ToastHandler;

#[derive(Debug, Deserialize)]
struct ToastEffect {
    message: String,
    #[serde(default)]
    level: Option<String>,
}

#[async_trait]
impl EffectHandler for ToastHandler {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()> {
        let params: ToastEffect = serde_json::from_value(effect.0.clone())?;
        let template_ctx = ctx.template_context();
        publish_toast(ToastRecord {
            message: interpolate(&params.message, &template_ctx),
            level: params.level,
            task_id: ctx.job_id.clone(),
        });
        Ok(())
    }
}

/// POST the job outcome to a caller-specified URL
pub struct WebhookHandler {
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WebhookEffect {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<Map<String, Value>>,
}

#[async_trait]
impl EffectHandler for WebhookHandler {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()> {
        let params: WebhookEffect = serde_json::from_value(effect.0.clone())?;
        let template_ctx = ctx.template_context();
        let url = interpolate(&params.url, &template_ctx);
        let method = params.method.as_deref().unwrap_or("POST").to_uppercase();

        let body = json!({
            "task": ctx.job.task_type,
            "result": ctx.result,
            "error": ctx.error,
            "jobId": ctx.job_id,
        });

        let mut request = match method.as_str() {
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            other => anyhow::bail!("unsupported webhook method: {other}"),
        };

        // Caller headers are merged over the JSON content type
        request = request.header("Content-Type", "application/json");
        if let Some(headers) = &params.headers {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(name.as_str(), interpolate(v, &template_ctx));
                }
            }
        }

        let response = request.json(&body).send().await?;
        tracing::debug!("🪝 webhook {} {} → {}", method, url, response.status());
        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}

/// Route a templated message to a notification channel
pub struct NotifyHandler {
    pub client: reqwest::Client,
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotifyEffect {
    channel: String,
    message: String,
}

#[async_trait]
impl EffectHandler for NotifyHandler {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()> {
        let params: NotifyEffect = serde_json::from_value(effect.0.clone())?;
        let message = interpolate(&params.message, &ctx.template_context());

        match params.channel.as_str() {
            "slack" => {
                let url = self
                    .slack_webhook_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("SLACK_WEBHOOK_URL is not configured"))?;
                self.client
                    .post(url)
                    .json(&json!({"text": message}))
                    .send()
                    .await?
                    .error_for_status()?;
            }
            "discord" => {
                let url = self
                    .discord_webhook_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DISCORD_WEBHOOK_URL is not configured"))?;
                self.client
                    .post(url)
                    .json(&json!({"content": message}))
                    .send()
                    .await?
                    .error_for_status()?;
            }
            "email" => {
                // Email delivery is handler-extensible: register a custom
                // handler under a dedicated kind to wire a provider in
                anyhow::bail!("no email handler registered");
            }
            other => anyhow::bail!("unknown notify channel: {other}"),
        }
        Ok(())
    }
}

/// Emit a cache-invalidation record to the process-wide channel
pub struct InvalidateHandler;

#[derive(Debug, Deserialize)]
struct InvalidateEffect {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[async_trait]
impl EffectHandler for InvalidateHandler {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()> {
        let params: InvalidateEffect = serde_json::from_value(effect.0.clone())?;
        let template_ctx = ctx.template_context();
        publish_invalidation(InvalidateRecord {
            path: params.path.map(|p| interpolate(&p, &template_ctx)),
            tags: params.tags.unwrap_or_default(),
            task_id: ctx.job_id.clone(),
        });
        Ok(())
    }
}

/// Emit a custom named event to the generic event channel
pub struct EmitHandler;

#[derive(Debug, Deserialize)]
struct EmitEffect {
    name: String,
    #[serde(default)]
    data: Option<Value>,
}

#[async_trait]
impl EffectHandler for EmitHandler {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()> {
        let params: EmitEffect = serde_json::from_value(effect.0.clone())?;
        let template_ctx = ctx.template_context();
        let data = match params.data {
            Some(data) => Some(deep_interpolate(&data, &template_ctx)?),
            None => None,
        };
        publish_event(CustomEvent {
            name: params.name,
            data,
            task_id: ctx.job_id.clone(),
        });
        Ok(())
    }
}

/// Build a child job from a deep-interpolated template and enqueue it
pub struct EnqueueHandler {
    pub queue: Arc<JobQueue>,
}

#[derive(Debug, Deserialize)]
struct EnqueueEffect {
    job: Value,
}

#[async_trait]
impl EffectHandler for EnqueueHandler {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()> {
        let params: EnqueueEffect = serde_json::from_value(effect.0.clone())?;
        let resolved = deep_interpolate(&params.job, &ctx.template_context())?;
        let child: Job = serde_json::from_value(resolved)?;

        let child_id = self.queue.enqueue(child).await?;
        tracing::info!("🔗 Job {} enqueued child job {}", ctx.job_id, child_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::channels::{subscribe_invalidations, subscribe_toasts};
    use serde_json::json;

    fn ctx_with_result() -> EffectContext {
        let job: Job = serde_json::from_value(json!({
            "type": "audio.transcribe",
            "payload": {"file": "a.wav"}
        }))
        .unwrap();
        let mut ctx = EffectContext::new("job-42", &job);
        ctx.result = Some(json!({"text": "hello"}));
        ctx
    }

    #[tokio::test]
    async fn toast_interpolates_message() {
        let mut rx = subscribe_toasts();
        let effect = Effect(json!({
            "$event": "toast",
            "message": "done: {{result.text}} ({{payload.file}})"
        }));

        ToastHandler.handle(&effect, &ctx_with_result()).await.unwrap();

        let toast = rx.recv().await.unwrap();
        assert_eq!(toast.message, "done: hello (a.wav)");
        assert_eq!(toast.task_id, "job-42");
    }

    #[tokio::test]
    async fn invalidate_carries_task_id() {
        let mut rx = subscribe_invalidations();
        let effect = Effect(json!({
            "$event": "invalidate",
            "path": "/jobs/{{jobId}}",
            "tags": ["transcripts"]
        }));

        InvalidateHandler
            .handle(&effect, &ctx_with_result())
            .await
            .unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.path.as_deref(), Some("/jobs/job-42"));
        assert_eq!(record.tags, vec!["transcripts"]);
        assert_eq!(record.task_id, "job-42");
    }

    #[tokio::test]
    async fn notify_without_configuration_errors() {
        let handler = NotifyHandler {
            client: reqwest::Client::new(),
            slack_webhook_url: None,
            discord_webhook_url: None,
        };
        let effect = Effect(json!({
            "$event": "notify",
            "channel": "slack",
            "message": "hi"
        }));
        let err = handler
            .handle(&effect, &ctx_with_result())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SLACK_WEBHOOK_URL"));
    }
}
