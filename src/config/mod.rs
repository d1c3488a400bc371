/// Configuration management for the jobway engine
///
/// Handles server binding, broker connection, backend endpoints, worker
/// concurrency and notification targets. Everything reads from environment
/// variables with container-friendly defaults.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Queue broker configuration
    pub broker: BrokerConfig,
    /// Remote compute backend endpoints
    pub backends: BackendsConfig,
    /// Worker pool sizing
    pub workers: WorkersConfig,
    /// Notification effect targets
    pub notify: NotifyConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g. "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Queue broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Redis connection URL; without it the in-memory broker is used and
    /// jobs do not survive a restart
    pub redis_url: Option<String>,
}

/// Remote compute backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Modal task-server URL
    pub modal_url: Option<String>,
    /// Bearer token for the Modal task server
    pub modal_token: Option<String>,
    /// Ray task-server URL
    pub ray_url: Option<String>,
}

/// Worker pool sizing per lane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Workers for the default and cpu lanes
    pub concurrency: usize,
    /// Workers for the gpu lane
    pub gpu_concurrency: usize,
}

/// Notification effect targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container
    /// deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("JOBWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("PORT")
                    .unwrap_or_else(|_| "3020".to_string())
                    .parse()
                    .unwrap_or(3020),
            },
            broker: BrokerConfig {
                redis_url: env_opt("REDIS_URL"),
            },
            backends: BackendsConfig {
                modal_url: env_opt("MODAL_URL"),
                modal_token: env_opt("MODAL_TOKEN"),
                ray_url: env_opt("RAY_URL"),
            },
            workers: WorkersConfig {
                concurrency: env_usize("WORKER_CONCURRENCY", 5),
                gpu_concurrency: env_usize("GPU_WORKER_CONCURRENCY", 2),
            },
            notify: NotifyConfig {
                slack_webhook_url: env_opt("SLACK_WEBHOOK_URL"),
                discord_webhook_url: env_opt("DISCORD_WEBHOOK_URL"),
            },
        }
    }
}
