/// Jobway: declarative job orchestration engine
///
/// Main entry point for the jobway server. Initializes configuration and
/// starts the HTTP server with the queue, worker pools and backend
/// registry.

use jobway::{start_server, Config};

/// Application entry point
///
/// The server provides:
/// - Job submission and status at /api/tasks
/// - Best-effort cancellation via DELETE /api/tasks/{id}
/// - Health check at /health
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from the environment (REDIS_URL, MODAL_URL, ...)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
