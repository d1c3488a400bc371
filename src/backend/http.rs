/// HTTP backend adapter for Modal/Ray-shaped compute services
///
/// Speaks the remote task-server protocol: `POST /run_task` with
/// `{task_type, payload}` and bearer auth, `GET /status/<id>`, and a health
/// probe at `/health_check` falling back to `/health`. A non-2xx response or
/// a body carrying an `error` field becomes a typed execution error with the
/// remote message preserved.

use crate::backend::Backend;
use crate::error::OrchestratorError;
use crate::job::types::{ResourcePool, TaskRequest, TaskResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Default transport timeout for task execution round-trips
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(120);

/// Health probes get a short timeout of their own
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapter configuration: at minimum a base URL, optionally a bearer token
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub name: String,
    pub url: String,
    pub token: Option<String>,
}

/// Backend adapter over a remote HTTP task server
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
    probe_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(EXECUTE_TIMEOUT)
            .build()
            .unwrap_or_default();
        let probe_client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            probe_client,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Pull the most useful error message out of a remote response body
    fn remote_message(body: &str) -> String {
        match serde_json::from_str::<Value>(body) {
            Ok(json) => json
                .get("error")
                .or_else(|| json.get("message"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            Err(_) => body.to_string(),
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, task: &TaskRequest) -> Result<Value, OrchestratorError> {
        let url = self.endpoint("run_task");
        tracing::debug!("🌐 {} → {} ({})", self.config.name, url, task.task_type);

        let mut body = json!({
            "task_type": task.task_type,
            "payload": task.payload,
        });
        if let Some(resources) = &task.resources {
            body["resources"] = serde_json::to_value(resources)
                .map_err(|e| OrchestratorError::BackendExecution(e.to_string()))?;
        }

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::BackendExecution(format!(
                    "{}: request failed: {e}",
                    self.config.name
                ))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            OrchestratorError::BackendExecution(format!(
                "{}: failed to read response: {e}",
                self.config.name
            ))
        })?;

        if !status.is_success() {
            return Err(OrchestratorError::BackendExecution(format!(
                "{}: {} — {}",
                self.config.name,
                status.as_u16(),
                Self::remote_message(&text)
            )));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            OrchestratorError::BackendExecution(format!(
                "{}: invalid response body: {e}",
                self.config.name
            ))
        })?;

        // A 2xx body can still signal failure
        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(OrchestratorError::BackendExecution(format!(
                "{}: {message}",
                self.config.name
            )));
        }

        // Task servers wrap the payload result under "result"; older ones
        // return it bare
        Ok(parsed.get("result").cloned().unwrap_or(parsed))
    }

    async fn get_status(&self, task_id: &str) -> Result<TaskResult, OrchestratorError> {
        let url = self.endpoint(&format!("status/{task_id}"));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| OrchestratorError::BackendExecution(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::BackendExecution(format!(
                "{}: status lookup returned {}",
                self.config.name,
                response.status().as_u16()
            )));
        }

        response
            .json::<TaskResult>()
            .await
            .map_err(|e| OrchestratorError::BackendExecution(e.to_string()))
    }

    async fn is_healthy(&self) -> bool {
        for path in ["health_check", "health"] {
            let url = self.endpoint(path);
            if let Ok(response) = self.authorize(self.probe_client.get(&url)).send().await {
                if response.status().is_success() {
                    return true;
                }
            }
        }
        false
    }

    async fn get_resources(&self) -> Option<ResourcePool> {
        let url = self.endpoint("resources");
        let response = self
            .authorize(self.probe_client.get(&url))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<ResourcePool>().await.ok()
    }

    async fn cancel(&self, task_id: &str) -> bool {
        let url = self.endpoint(&format!("cancel/{task_id}"));
        match self.authorize(self.client.post(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
