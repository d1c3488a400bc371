/// Server setup and initialization
///
/// Wires together all components: backend registry, queue broker, effect
/// dispatcher, worker pools and HTTP routes. Provides the main application
/// factory for creating the Axum app.

use crate::{
    api::{create_task_routes, AppState},
    backend::{registry, HttpBackend},
    backend::http::HttpBackendConfig,
    config::Config,
    effects::EffectDispatcher,
    queue::{InMemoryBroker, JobQueue, RedisBroker, WorkerPool, WorkerPoolConfig},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with every component wired
pub async fn create_app(config: Config) -> Result<(Router, Arc<JobQueue>, WorkerPool)> {
    // Register backend adapters from configuration
    tracing::info!("🔌 Registering compute backends");
    if let Some(url) = &config.backends.modal_url {
        registry::register(Arc::new(HttpBackend::new(HttpBackendConfig {
            name: "modal".to_string(),
            url: url.clone(),
            token: config.backends.modal_token.clone(),
        })));
    }
    if let Some(url) = &config.backends.ray_url {
        registry::register(Arc::new(HttpBackend::new(HttpBackendConfig {
            name: "ray".to_string(),
            url: url.clone(),
            token: None,
        })));
    }

    // Pick the broker: Redis when configured, in-memory otherwise
    let broker: Arc<dyn crate::queue::broker::QueueBroker> = match &config.broker.redis_url {
        Some(url) => Arc::new(RedisBroker::connect(url).await?),
        None => {
            tracing::warn!("⚠️ REDIS_URL not set — using the in-memory broker (jobs will not survive restarts)");
            Arc::new(InMemoryBroker::new())
        }
    };

    // Queue facade, then the effect dispatcher that needs it for enqueue
    // effects, then install the dispatcher back into the queue
    tracing::info!("📬 Initializing job queue");
    let queue = JobQueue::new(broker).await?;
    let effects = Arc::new(EffectDispatcher::with_defaults(queue.clone(), &config));
    queue.install_effects(effects);

    // Worker pools per lane
    tracing::info!("👷 Starting worker pools");
    let workers = WorkerPool::start(
        queue.clone(),
        WorkerPoolConfig {
            concurrency: config.workers.concurrency,
            gpu_concurrency: config.workers.gpu_concurrency,
        },
    );

    let app_state = AppState {
        queue: queue.clone(),
    };

    tracing::info!("📡 Creating HTTP router");
    let app = Router::new()
        .route("/health", get(health_check))
        .merge(create_task_routes().with_state(app_state));

    tracing::info!("✅ Application initialized");
    Ok((app, queue, workers))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting jobway server...");

    let (app, queue, workers) = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain workers, then let the broker close with in-flight state intact
    workers.shutdown().await;
    queue.close().await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("🛑 Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
