/// Effect Dispatch Layer
///
/// Effects are declarative lifecycle hooks attached to jobs (`onPending`,
/// `onProgress`, `onSuccess`, `onError`). The dispatcher matches each record
/// by its `$event` discriminant to a registered handler and invokes them in
/// declaration order. Effects are best-effort: a failing handler is logged
/// and swallowed, and never changes the job's outcome.

// Handler implementations for the built-in effect kinds
pub mod handlers;

// In-process broadcast channels (toast / invalidate / emit)
pub mod channels;

use crate::job::types::{Effect, EffectContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One effect kind's behavior
///
/// Handlers receive the raw effect record plus the common context and
/// deserialize their own payload shape. New kinds are added by registering
/// another handler — nothing else changes.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    async fn handle(&self, effect: &Effect, ctx: &EffectContext) -> anyhow::Result<()>;
}

/// Maps `$event` discriminants to handlers, registered once at startup
#[derive(Default)]
pub struct EffectDispatcher {
    handlers: HashMap<String, Arc<dyn EffectHandler>>,
}

impl EffectDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register (or replace) the handler for an effect kind
    pub fn register(&mut self, kind: &str, handler: Arc<dyn EffectHandler>) {
        self.handlers.insert(kind.to_string(), handler);
    }

    /// Run a list of effects in declaration order
    ///
    /// Each handler is awaited before the next starts. Failures and unknown
    /// kinds are logged; every remaining effect still runs.
    pub async fn run_effects(&self, effects: &[Effect], ctx: &EffectContext) {
        for effect in effects {
            let Some(kind) = effect.kind() else {
                tracing::warn!("⚠️ Effect without $event discriminant ignored: {}", effect.0);
                continue;
            };

            match self.handlers.get(kind) {
                Some(handler) => {
                    if let Err(error) = handler.handle(effect, ctx).await {
                        tracing::warn!(
                            "⚠️ Effect '{}' failed for job {}: {}",
                            kind,
                            ctx.job_id,
                            error
                        );
                    }
                }
                None => {
                    tracing::warn!("⚠️ Unknown effect kind '{}' ignored", kind);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::types::Job;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EffectHandler for Counting {
        async fn handle(&self, _effect: &Effect, _ctx: &EffectContext) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler exploded");
            }
            Ok(())
        }
    }

    fn test_ctx() -> EffectContext {
        let job: Job = serde_json::from_value(json!({
            "type": "echo",
            "payload": {}
        }))
        .unwrap();
        EffectContext::new("job-1", &job)
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_later_effects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EffectDispatcher::new();
        dispatcher.register(
            "boom",
            Arc::new(Counting {
                calls: calls.clone(),
                fail: true,
            }),
        );
        dispatcher.register(
            "fine",
            Arc::new(Counting {
                calls: calls.clone(),
                fail: false,
            }),
        );

        let effects = vec![
            Effect(json!({"$event": "boom"})),
            Effect(json!({"$event": "fine"})),
            Effect(json!({"$event": "fine"})),
        ];
        dispatcher.run_effects(&effects, &test_ctx()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_kind_is_ignored() {
        let dispatcher = EffectDispatcher::new();
        let effects = vec![Effect(json!({"$event": "mystery"})), Effect(json!({}))];
        // Must not panic or error
        dispatcher.run_effects(&effects, &test_ctx()).await;
    }
}
