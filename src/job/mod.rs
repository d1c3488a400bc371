/// Declarative Job Model
///
/// This module holds everything callers submit and everything the runtime
/// resolves against:
/// - Type definitions (Job, Step, RetryPolicy, Effect, PipelineResult)
/// - The `{{dotted.path}}` template language wiring steps together
/// - Pre-flight pipeline validation (ids, dependencies, cycles)

// Core job and pipeline type definitions
pub mod types;

// Template resolution language
pub mod template;

// Pre-flight pipeline validation
pub mod validate;

// Re-export commonly used types
pub use types::{
    Effect, EffectContext, Job, JobContext, JobStatus, PipelineResult, QueueLane, ResourceHint,
    ResourcePool, RetryPolicy, StatusRecord, Step, StepState, StepStatus, TaskRequest, TaskResult,
};
pub use validate::validate_pipeline;
