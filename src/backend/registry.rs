/// Process-wide backend registry with lock-free reads
///
/// Registration happens at startup; dispatch reads the adapter list on every
/// step, so the registry stores an ArcSwap'd vector and swaps the whole
/// pointer on mutation. Insertion order is preserved because "auto"
/// selection probes backends in the order they were registered.

use crate::backend::Backend;
use crate::error::OrchestratorError;
use arc_swap::ArcSwap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// How long a health probe may take before the backend counts as unhealthy
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of name → adapter, ordered by registration
#[derive(Default)]
pub struct BackendRegistry {
    backends: ArcSwap<Vec<Arc<dyn Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Register an adapter; a re-registered name replaces the old adapter in
    /// place, keeping its position in the probe order
    pub fn register(&self, backend: Arc<dyn Backend>) {
        let name = backend.name().to_string();
        self.backends.rcu(|current| {
            let mut next: Vec<Arc<dyn Backend>> = (**current).clone();
            match next.iter().position(|b| b.name() == name) {
                Some(pos) => next[pos] = backend.clone(),
                None => next.push(backend.clone()),
            }
            next
        });
        tracing::info!("🔌 Registered backend: {}", name);
    }

    /// Drop every registered adapter (test helper)
    pub fn clear(&self) {
        self.backends.store(Arc::new(Vec::new()));
    }

    /// Registered adapter names in probe order
    pub fn names(&self) -> Vec<String> {
        self.backends
            .load()
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Pick an adapter for a task
    ///
    /// An explicit name must exist and be healthy. "auto" (or no hint)
    /// probes registered backends in insertion order and returns the first
    /// healthy one.
    pub async fn select(
        &self,
        hint: Option<&str>,
    ) -> Result<Arc<dyn Backend>, OrchestratorError> {
        let backends = self.backends.load_full();

        match hint {
            Some(name) if name != "auto" => {
                let backend = backends
                    .iter()
                    .find(|b| b.name() == name)
                    .cloned()
                    .ok_or_else(|| {
                        OrchestratorError::BackendUnavailable(format!(
                            "backend '{name}' is not registered"
                        ))
                    })?;
                if !probe(&backend).await {
                    return Err(OrchestratorError::BackendUnavailable(format!(
                        "backend '{name}' failed its health probe"
                    )));
                }
                Ok(backend)
            }
            _ => {
                for backend in backends.iter() {
                    if probe(backend).await {
                        tracing::debug!("🎯 Auto-selected backend: {}", backend.name());
                        return Ok(backend.clone());
                    }
                }
                Err(OrchestratorError::BackendUnavailable(
                    "no healthy backend registered".to_string(),
                ))
            }
        }
    }
}

/// Health probe bounded at 5 seconds
async fn probe(backend: &Arc<dyn Backend>) -> bool {
    match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, backend.is_healthy()).await {
        Ok(healthy) => healthy,
        Err(_) => {
            tracing::warn!("⚠️ Health probe timed out for backend: {}", backend.name());
            false
        }
    }
}

/// The process-wide registry used by the dispatch path
pub fn global() -> &'static BackendRegistry {
    static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BackendRegistry::new)
}

/// Register an adapter in the process-wide registry
pub fn register(backend: Arc<dyn Backend>) {
    global().register(backend);
}

/// Clear the process-wide registry (test helper)
pub fn clear() {
    global().clear();
}

/// Select from the process-wide registry
pub async fn select(hint: Option<&str>) -> Result<Arc<dyn Backend>, OrchestratorError> {
    global().select(hint).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::types::{TaskRequest, TaskResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct FakeBackend {
        name: String,
        healthy: bool,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, task: &TaskRequest) -> Result<Value, OrchestratorError> {
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
            self.healthy
        }
    }

    fn fake(name: &str, healthy: bool) -> Arc<dyn Backend> {
        Arc::new(FakeBackend {
            name: name.to_string(),
            healthy,
        })
    }

    #[tokio::test]
    async fn explicit_selection_requires_registration_and_health() {
        let registry = BackendRegistry::new();
        registry.register(fake("modal", true));
        registry.register(fake("ray", false));

        assert_eq!(registry.select(Some("modal")).await.unwrap().name(), "modal");

        let missing = match registry.select(Some("nope")).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(missing, OrchestratorError::BackendUnavailable(_)));

        let unhealthy = match registry.select(Some("ray")).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(unhealthy.to_string().contains("health probe"));
    }

    #[tokio::test]
    async fn auto_selects_first_healthy_in_insertion_order() {
        let registry = BackendRegistry::new();
        registry.register(fake("down", false));
        registry.register(fake("up-1", true));
        registry.register(fake("up-2", true));

        assert_eq!(registry.select(Some("auto")).await.unwrap().name(), "up-1");
        assert_eq!(registry.select(None).await.unwrap().name(), "up-1");
    }

    #[tokio::test]
    async fn auto_fails_when_nothing_is_healthy() {
        let registry = BackendRegistry::new();
        registry.register(fake("down", false));
        assert!(registry.select(None).await.is_err());
    }

    #[tokio::test]
    async fn reregistration_replaces_in_place() {
        let registry = BackendRegistry::new();
        registry.register(fake("a", false));
        registry.register(fake("b", true));
        registry.register(fake("a", true));

        // "a" keeps its original slot, so auto picks it first
        assert_eq!(registry.select(None).await.unwrap().name(), "a");
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
