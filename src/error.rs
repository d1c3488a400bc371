/// Typed error taxonomy for the orchestration core
///
/// Each variant maps to one failure kind with its own propagation rule:
/// validation and deadlock errors are terminal for the job, backend errors
/// are subject to retry policies, and step failures carry the failing step's
/// message verbatim so the queue records exactly what the backend reported.

use thiserror::Error;

/// Errors surfaced by the pipeline execution core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed job or pipeline definition: missing fields, duplicate step
    /// ids, unknown dependencies, or a template that resolved to the wrong
    /// shape (e.g. `forEach` over a non-sequence). Fails fast, never retried.
    #[error("invalid job definition: {0}")]
    Validation(String),

    /// The requested backend is missing or no registered backend passed its
    /// health probe. The whole job fails unless an outer retry is configured.
    #[error("no backend available: {0}")]
    BackendUnavailable(String),

    /// The remote compute service returned a non-2xx response or an error
    /// body. Subject to the step's retry policy.
    #[error("backend execution failed: {0}")]
    BackendExecution(String),

    /// A non-optional step exhausted its retries. Display keeps the
    /// underlying message verbatim; the step id travels as structured data.
    #[error("{message}")]
    StepFailed {
        /// Id of the step that failed
        step: String,
        /// The failing attempt's error message, unchanged
        message: String,
    },

    /// The dependency graph can never make progress: no step is runnable and
    /// none is running, but pending steps remain. Lists the stuck steps.
    #[error("pipeline deadlock: steps {0:?} can never become runnable (circular or unsatisfiable dependsOn)")]
    Deadlock(Vec<String>),

    /// The queue broker rejected or failed an operation.
    #[error("queue broker error: {0}")]
    Broker(String),
}

impl OrchestratorError {
    /// True when the error indicates a broken job definition that no amount
    /// of retrying will fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Validation(_) | OrchestratorError::Deadlock(_)
        )
    }
}
